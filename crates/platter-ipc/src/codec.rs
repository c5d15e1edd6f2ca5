//! Newline-terminated JSON framing.
//!
//! A message is its compact JSON encoding followed by exactly one `\n`. JSON
//! never contains a raw newline, so the first `\n` ends the message; anything
//! after it on the connection is payload.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{RemoteError, Result};

/// Upper bound on a single encoded message, newline included.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Encode `msg` and write it followed by a newline.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut buf = serde_json::to_vec(msg)?;
    if buf.len() >= MAX_MESSAGE_SIZE {
        return Err(RemoteError::MessageTooLarge {
            limit: MAX_MESSAGE_SIZE,
        });
    }
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message, consuming its terminating newline and nothing more.
pub async fn read_message<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    (&mut *reader)
        .take(MAX_MESSAGE_SIZE as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if line.last() != Some(&b'\n') {
        if line.len() >= MAX_MESSAGE_SIZE {
            return Err(RemoteError::MessageTooLarge {
                limit: MAX_MESSAGE_SIZE,
            });
        }
        return Err(RemoteError::UnexpectedEof);
    }
    line.pop();
    Ok(serde_json::from_slice(&line)?)
}

/// Run `fut` under an optional deadline.
pub async fn with_timeout<F: Future>(
    limit: Option<Duration>,
    what: &'static str,
    fut: F,
) -> Result<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| RemoteError::Timeout(what)),
        None => Ok(fut.await),
    }
}
