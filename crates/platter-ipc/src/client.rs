//! TCP client for the peer protocol.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf, Take};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::codec::{read_message, with_timeout, write_message};
use crate::{ObjectClient, RemoteError, RemoteObject, Request, Response, Result, Status};

/// Fetches objects from a peer running the platter server.
#[derive(Debug, Clone)]
pub struct PeerClient {
    addr: String,
    label: String,
    timeout: Option<Duration>,
}

impl PeerClient {
    /// Client for the default label of the server at `addr` (host:port).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            label: crate::DEFAULT_LABEL.to_string(),
            timeout: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Bound connecting and waiting for the response header.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl ObjectClient for PeerClient {
    async fn fetch(&self, path: &str) -> Result<RemoteObject> {
        debug!(addr = %self.addr, label = %self.label, path, "Fetching from peer");

        let stream = with_timeout(self.timeout, "connecting", TcpStream::connect(&self.addr))
            .await??;
        let (read_half, mut write_half) = stream.into_split();

        write_message(&mut write_half, &Request::new(path, self.label.clone())).await?;

        let mut reader = BufReader::new(read_half);
        let response: Response =
            with_timeout(self.timeout, "waiting for response", read_message(&mut reader))
                .await??;

        if response.status != Status::Ok {
            return Err(RemoteError::Status {
                status: response.status,
                path: path.to_string(),
            });
        }

        Ok(RemoteObject {
            stream: Box::new(PeerStream {
                payload: reader.take(response.size),
                _writer: write_half,
            }),
            name: response.name,
            mod_time: response.mod_time,
            size: response.size,
        })
    }
}

/// Payload bytes of one response. Holds the write half so the connection
/// stays fully open until the payload is consumed or dropped.
struct PeerStream {
    payload: Take<BufReader<OwnedReadHalf>>,
    _writer: OwnedWriteHalf,
}

impl AsyncRead for PeerStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.payload).poll_read(cx, buf)
    }
}
