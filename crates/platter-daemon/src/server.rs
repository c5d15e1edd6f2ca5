//! Remote object server: one request, one object per connection.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use platter_config::{log_server_debug, log_server_error, log_server_info, log_server_warn};
use platter_fs::{copy_to, FileSystem, FsError};
use platter_ipc::{read_message, with_timeout, write_message, Request, Response, Status, DEFAULT_LABEL};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

/// Filesystems served, keyed by label. The empty label is the default.
#[derive(Clone, Default)]
pub struct Registry {
    filesystems: HashMap<String, Arc<dyn FileSystem>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry serving `fs` under the default label.
    pub fn with_default(fs: Arc<dyn FileSystem>) -> Self {
        let mut registry = Self::new();
        registry.insert(DEFAULT_LABEL, fs);
        registry
    }

    pub fn insert(&mut self, label: impl Into<String>, fs: Arc<dyn FileSystem>) {
        self.filesystems.insert(label.into(), fs);
    }

    pub fn get(&self, label: &str) -> Option<&Arc<dyn FileSystem>> {
        self.filesystems.get(label)
    }

    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.filesystems.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Bound on receiving the request message.
    pub request_timeout: Option<Duration>,
    /// Bound on each payload write.
    pub write_timeout: Option<Duration>,
}

pub struct Server {
    registry: Arc<Registry>,
    options: Arc<ServerOptions>,
}

impl Server {
    pub fn new(registry: Registry, options: ServerOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            options: Arc::new(options),
        }
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?.to_string();
        log_server_info!("Listening", addr = addr.as_str());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            let peer = peer.to_string();
                            log_server_debug!("Accepted connection", peer = peer.as_str());
                            tokio::spawn(handle_connection(
                                stream,
                                Arc::clone(&self.registry),
                                Arc::clone(&self.options),
                            ));
                        }
                        Err(err) => {
                            let error = err.to_string();
                            log_server_error!("Accept error", error = error.as_str());
                        }
                    }
                }
                _ = &mut shutdown => {
                    log_server_info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, registry: Arc<Registry>, options: Arc<ServerOptions>) {
    if let Err(e) = serve_request(stream, &registry, &options).await {
        let error = e.to_string();
        log_server_debug!("Connection ended with error", error = error.as_str());
    }
}

/// Map an open failure to its wire status.
pub fn open_status(err: &FsError) -> Status {
    match err {
        FsError::NotFound(_) => Status::NotFound,
        FsError::InvalidPath(_) => Status::InvalidPath,
        FsError::IsDirectory(_) => Status::IsDirectory,
        _ => Status::PathError,
    }
}

async fn refuse(writer: &mut OwnedWriteHalf, status: Status, request: Option<&Request>) -> Result<Status> {
    let status_code = status.code();
    let path = request.map(|r| r.path.as_str()).unwrap_or("");
    let label = request.map(|r| r.label.as_str()).unwrap_or("");
    log_server_info!("Refusing request", status = status_code, path = path, label = label);
    write_message(writer, &Response::error(status)).await?;
    writer.shutdown().await?;
    Ok(status)
}

async fn serve_request(stream: TcpStream, registry: &Registry, options: &ServerOptions) -> Result<Status> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request: Request =
        match with_timeout(options.request_timeout, "reading request", read_message(&mut reader)).await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) | Err(e) => {
                let error = e.to_string();
                log_server_warn!("Unreadable request", error = error.as_str());
                return refuse(&mut writer, Status::PathError, None).await;
            }
        };

    let Some(fs) = registry.get(&request.label) else {
        return refuse(&mut writer, Status::LabelNotFound, Some(&request)).await;
    };

    let file = match fs.open(&request.path).await {
        Ok(file) => file,
        Err(e) => {
            let error = e.to_string();
            log_server_debug!("Open failed", path = request.path.as_str(), error = error.as_str());
            return refuse(&mut writer, open_status(&e), Some(&request)).await;
        }
    };

    let info = match file.stat().await {
        Ok(info) => info,
        Err(_) => return refuse(&mut writer, Status::FileError, Some(&request)).await,
    };
    if info.is_dir {
        return refuse(&mut writer, Status::IsDirectory, Some(&request)).await;
    }

    write_message(&mut writer, &Response::ok(info.size, info.mod_time, info.name.clone())).await?;
    let sent = copy_to(file.as_ref(), &mut writer, options.write_timeout).await?;
    if sent != info.size {
        log_server_warn!(
            "Payload size differs from stat",
            path = request.path.as_str(),
            expected = info.size,
            sent = sent
        );
    }
    writer.shutdown().await?;
    log_server_debug!("Sent object", path = request.path.as_str(), bytes = sent);
    Ok(Status::Ok)
}
