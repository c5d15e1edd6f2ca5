//! Chunked view over a sequential download.
//!
//! A [`ChunkedStream`] splits an object of known size into fixed-size chunks,
//! each guarded by its own lock. A background producer holds every chunk's
//! write guard from the start and releases them in order as the bytes
//! arrive, so readers of chunk `k` wait exactly until chunk `k` is filled
//! while earlier chunks are already readable.
//!
//! If the stream fails while filling chunk `m`, chunk `m` and every later
//! chunk carry that error. Chunks before `m` stay valid.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::{File, FileInfo, FsError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Most chunks one stream may be split into. With the default chunk size this
/// admits objects up to 1 TiB.
pub const MAX_CHUNKS: u64 = 1 << 20;

/// Tuning for chunked downloads.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    /// Bound on reading one chunk from the network.
    pub read_timeout: Option<Duration>,
    /// Bound on a reader waiting for one chunk to be filled.
    pub wait_timeout: Option<Duration>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            read_timeout: Some(Duration::from_secs(30)),
            wait_timeout: Some(Duration::from_secs(120)),
        }
    }
}

enum ChunkState {
    Pending,
    Filled(Bytes),
    Failed(FsError),
}

struct Chunk {
    size: usize,
    state: Arc<RwLock<ChunkState>>,
}

type ChunkGuard = OwnedRwLockWriteGuard<ChunkState>;

/// A remote object exposed as a [`File`] while it downloads.
pub struct ChunkedStream {
    info: FileInfo,
    chunk_size: usize,
    chunks: Vec<Chunk>,
    wait_timeout: Option<Duration>,
    producer: JoinHandle<()>,
}

impl ChunkedStream {
    /// Start filling chunks from `stream`, which must yield `info.size` bytes.
    ///
    /// Every chunk is locked before the stream is returned, so no reader can
    /// observe an unfilled chunk. Sizes needing more than [`MAX_CHUNKS`]
    /// chunks are refused before anything is allocated.
    pub async fn spawn<R>(stream: R, info: FileInfo, options: &ChunkOptions) -> Result<Arc<Self>>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let chunk_size = options.chunk_size.max(1);
        if info.size.div_ceil(chunk_size as u64) > MAX_CHUNKS {
            return Err(FsError::TooLarge {
                name: info.name,
                size: info.size,
            });
        }
        let sizes = chunk_sizes(info.size, chunk_size);

        let mut chunks = Vec::with_capacity(sizes.len());
        let mut guards = Vec::with_capacity(sizes.len());
        for size in sizes {
            let state = Arc::new(RwLock::new(ChunkState::Pending));
            guards.push((size, Arc::clone(&state).write_owned().await));
            chunks.push(Chunk { size, state });
        }

        let producer = tokio::spawn(fill_chunks(
            stream,
            guards,
            options.read_timeout,
            info.name.clone(),
        ));

        Ok(Arc::new(Self {
            info,
            chunk_size,
            chunks,
            wait_timeout: options.wait_timeout,
            producer,
        }))
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the download already failed. Failure always reaches the last chunk.
    pub fn has_failed(&self) -> bool {
        self.chunks.last().is_some_and(|chunk| {
            matches!(chunk.state.try_read().as_deref(), Ok(ChunkState::Failed(_)))
        })
    }

    /// Copy `dst.len()` bytes from chunk `index` starting at `within`.
    async fn read_chunk(&self, index: usize, within: usize, dst: &mut [u8]) -> Result<()> {
        let lock = self.chunks[index].state.read();
        let state = match self.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, lock).await.map_err(|_| {
                FsError::Timeout(format!("waiting for chunk {index} of {}", self.info.name))
            })?,
            None => lock.await,
        };
        match &*state {
            ChunkState::Filled(bytes) => {
                dst.copy_from_slice(&bytes[within..within + dst.len()]);
                Ok(())
            }
            ChunkState::Failed(err) => Err(err.clone()),
            // The producer went away without filling this chunk
            ChunkState::Pending => Err(FsError::Abandoned { index }),
        }
    }
}

#[async_trait]
impl File for ChunkedStream {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let size = self.info.size;
        if buf.is_empty() || offset >= size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(size - offset) as usize;
        let chunk_size = self.chunk_size as u64;

        let mut done = 0;
        while done < want {
            let pos = offset + done as u64;
            let index = (pos / chunk_size) as usize;
            let within = (pos % chunk_size) as usize;
            let n = (self.chunks[index].size - within).min(want - done);
            self.read_chunk(index, within, &mut buf[done..done + n])
                .await?;
            done += n;
        }
        Ok(done)
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(self.info.clone())
    }
}

impl Drop for ChunkedStream {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

/// Sizes of the chunks covering `total` bytes. Only the last may be short.
fn chunk_sizes(total: u64, chunk_size: usize) -> Vec<usize> {
    let step = chunk_size.max(1) as u64;
    let full = (total / step) as usize;
    let rest = (total % step) as usize;
    let mut sizes = vec![chunk_size.max(1); full];
    if rest > 0 {
        sizes.push(rest);
    }
    sizes
}

async fn fill_chunks<R>(
    mut stream: R,
    guards: Vec<(usize, ChunkGuard)>,
    read_timeout: Option<Duration>,
    name: String,
) where
    R: AsyncRead + Unpin,
{
    let mut pending = guards.into_iter().enumerate();
    while let Some((index, (size, mut guard))) = pending.next() {
        let mut buf = vec![0u8; size];
        let read = match read_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.read_exact(&mut buf)).await {
                Ok(result) => result.map_err(FsError::from),
                Err(_) => Err(FsError::Timeout(format!("reading chunk {index} of {name}"))),
            },
            None => stream.read_exact(&mut buf).await.map_err(FsError::from),
        };

        match read {
            Ok(_) => {
                *guard = ChunkState::Filled(Bytes::from(buf));
                trace!(name = %name, chunk = index, "Chunk filled");
            }
            Err(err) => {
                warn!(name = %name, chunk = index, error = %err, "Download failed, failing remaining chunks");
                *guard = ChunkState::Failed(err.clone());
                for (_, (_, mut rest)) in pending.by_ref() {
                    *rest = ChunkState::Failed(err.clone());
                }
                return;
            }
        }
    }
}
