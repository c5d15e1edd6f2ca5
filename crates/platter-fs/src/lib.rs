//! # platter-fs
//!
//! Uniform read-only filesystem interface over heterogeneous backing stores.
//!
//! Every backend answers [`FileSystem::open`] with a [`File`]: a seekable,
//! randomly addressable object that may still be downloading. Backends stack:
//!
//! ```text
//! MultiFs
//! ├── LocalFs                      (media already on disk)
//! └── CacheFs | CafsCacheFs        (local mirror, filled in the background)
//!     └── ChunkedRemoteFs          (network fetch exposed as chunks)
//!         └── dyn ObjectClient     (peer protocol, bucket, ...)
//! ```

pub mod cache;
pub mod cafs;
pub mod chunk;
pub mod compose;
mod error;
pub mod fill;
pub mod local;
pub mod memory;
pub mod remote;

pub use cache::CacheFs;
pub use cafs::{CafsCacheFs, CafsFs};
pub use chunk::{ChunkOptions, ChunkedStream, DEFAULT_CHUNK_SIZE, MAX_CHUNKS};
pub use compose::{MultiFs, PathRewrite};
pub use error::{FsError, Result};
pub use fill::{FillQueue, FillReport};
pub use local::{DiskFile, LocalFs};
pub use remote::ChunkedRemoteFs;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Buffer size used when streaming a file to a writer.
pub const COPY_BUF_SIZE: usize = 256 * 1024;

/// Metadata of an opened file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Advisory name. Content-addressed backends report the content hash.
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
}

/// An open, randomly addressable file.
#[async_trait]
pub trait File: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only when the end of the file is reached, and `0`
    /// at or past the end. May wait for data that is still arriving.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    async fn stat(&self) -> Result<FileInfo>;
}

pub type FileRef = Arc<dyn File>;

/// A source of files addressed by logical path.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn open(&self, path: &str) -> Result<FileRef>;
}

/// Read a whole file into memory.
pub async fn read_all(file: &dyn File) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = file.read_at(&mut buf, out.len() as u64).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

/// Stream a whole file into `writer`, bounding each write by `write_timeout`.
///
/// Returns the number of bytes copied.
pub async fn copy_to<W>(file: &dyn File, writer: &mut W, write_timeout: Option<Duration>) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut offset = 0u64;
    loop {
        let n = file.read_at(&mut buf, offset).await?;
        if n == 0 {
            break;
        }
        let write = writer.write_all(&buf[..n]);
        match write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .map_err(|_| FsError::Timeout("writing payload".to_string()))??,
            None => write.await?,
        }
        offset += n as u64;
    }
    writer.flush().await?;
    Ok(offset)
}

/// Last path segment, used as the advisory name of plain files.
pub(crate) fn base_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Run blocking filesystem work off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
