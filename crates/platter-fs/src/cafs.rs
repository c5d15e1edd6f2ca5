//! Content-addressed filesystem and its caching front.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use platter_cas::{CafsStore, CasError, ContentHash};
use platter_config::log_cache_debug;

use crate::fill::{FillQueue, FillReport};
use crate::local::DiskFile;
use crate::{blocking, lock, read_all, FileRef, FileSystem, FsError, Result};

/// Read/write view of a [`CafsStore`]. Files report their content hash as name.
#[derive(Clone)]
pub struct CafsFs {
    cafs: CafsStore,
}

impl CafsFs {
    pub fn new(cafs: CafsStore) -> Self {
        Self { cafs }
    }

    pub fn store(&self) -> &CafsStore {
        &self.cafs
    }

    /// Store `data` under `path`. Paths are write-once.
    pub async fn write(&self, path: &str, data: Vec<u8>) -> Result<ContentHash> {
        let cafs = self.cafs.clone();
        let path = path.to_string();
        blocking(move || {
            let mut writer = cafs.create(&path)?;
            writer.write_all(&data)?;
            Ok(writer.commit()?)
        })
        .await
    }

    /// Map `path` to already stored content.
    pub async fn link(&self, path: &str, hash: ContentHash) -> Result<()> {
        let cafs = self.cafs.clone();
        let path = path.to_string();
        blocking(move || Ok(cafs.link(&path, hash)?)).await
    }
}

#[async_trait]
impl FileSystem for CafsFs {
    async fn open(&self, path: &str) -> Result<FileRef> {
        let cafs = self.cafs.clone();
        let owned = path.to_string();
        let file = blocking(move || {
            let (file, hash) = cafs.open_path(&owned)?;
            Ok(DiskFile::new(file, hash.to_hex())?)
        })
        .await?;
        Ok(Arc::new(file))
    }
}

/// Caches a source filesystem into a [`CafsStore`].
///
/// The source is expected to name its files by content hash (as a peer
/// serving a CAFS does). When the named content is already stored, a miss is
/// answered by recording the path mapping alone, with no transfer.
pub struct CafsCacheFs {
    source: Arc<dyn FileSystem>,
    local: CafsFs,
    failures: Mutex<HashMap<String, FsError>>,
    fills: FillQueue,
}

impl CafsCacheFs {
    pub fn new(source: Arc<dyn FileSystem>, cafs: CafsStore) -> Self {
        Self {
            source,
            local: CafsFs::new(cafs),
            failures: Mutex::new(HashMap::new()),
            fills: FillQueue::new(),
        }
    }

    pub fn store(&self) -> &CafsStore {
        self.local.store()
    }

    pub async fn wait_fills(&self) -> Vec<FillReport> {
        self.fills.wait().await
    }

    pub fn clear_failures(&self) -> usize {
        let mut failures = lock(&self.failures);
        let count = failures.len();
        failures.clear();
        count
    }
}

#[async_trait]
impl FileSystem for CafsCacheFs {
    async fn open(&self, path: &str) -> Result<FileRef> {
        match self.local.open(path).await {
            Ok(file) => {
                log_cache_debug!("Cache hit", path = path);
                return Ok(file);
            }
            Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if let Some(err) = lock(&self.failures).get(path).cloned() {
            let error = err.to_string();
            log_cache_debug!("Replaying remembered failure", path = path, error = error.as_str());
            return Err(err);
        }

        let file = match self.source.open(path).await {
            Ok(file) => file,
            Err(e) => {
                lock(&self.failures).insert(path.to_string(), e.clone());
                return Err(e);
            }
        };
        let info = file.stat().await?;
        if info.is_dir {
            return Ok(file);
        }

        let claimed = ContentHash::from_hex(&info.name);
        match claimed {
            Some(hash) if self.store().has_content(&hash) => {
                match self.local.link(path, hash).await {
                    Ok(()) | Err(FsError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
                let hash = hash.to_hex();
                log_cache_debug!(
                    "Content already cached, linked without transfer",
                    path = path,
                    hash = hash.as_str()
                );
                drop(file);
                return self.local.open(path).await;
            }
            Some(_) => {}
            None => log_cache_debug!(
                "Source name is not a content hash",
                path = path,
                name = info.name.as_str()
            ),
        }

        log_cache_debug!("Cache miss, filling in background", path = path);
        let fill = fill_cafs(
            Arc::clone(&self.source),
            self.store().clone(),
            path.to_string(),
            claimed,
        );
        self.fills.spawn(path, fill);
        Ok(file)
    }
}

/// Copy `path` from `source` into `cafs`, verifying the claimed hash if any.
async fn fill_cafs(
    source: Arc<dyn FileSystem>,
    cafs: CafsStore,
    path: String,
    claimed: Option<ContentHash>,
) -> Result<u64> {
    let file = source.open(&path).await?;
    let data = read_all(file.as_ref()).await?;
    let actual = ContentHash::compute(&data);
    if let Some(expected) = claimed {
        if expected != actual {
            return Err(FsError::HashMismatch {
                path,
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
    }

    let len = data.len() as u64;
    blocking(move || match cafs.put(&path, &data) {
        Ok(_) => Ok(len),
        // Linked by a concurrent open while this fill ran
        Err(CasError::AlreadyExists { .. }) => Ok(0),
        Err(e) => Err(e.into()),
    })
    .await
}
