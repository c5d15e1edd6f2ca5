//! Write-through cache in front of a slower filesystem.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use platter_cas::DiskStore;
use platter_config::log_cache_debug;

use crate::fill::{FillQueue, FillReport};
use crate::local::LocalFs;
use crate::{blocking, copy_to, lock, FileRef, FileSystem, FsError, Result};

/// Serves from a local mirror, falling back to `source` on a miss.
///
/// A miss returns the source file right away and copies it into the mirror
/// in the background. Failed source opens are remembered per path and
/// replayed without touching the source again.
pub struct CacheFs {
    source: Arc<dyn FileSystem>,
    local: LocalFs,
    failures: Mutex<HashMap<String, FsError>>,
    fills: FillQueue,
}

impl CacheFs {
    pub fn new(source: Arc<dyn FileSystem>, store: DiskStore) -> Self {
        Self {
            source,
            local: LocalFs::new(store),
            failures: Mutex::new(HashMap::new()),
            fills: FillQueue::new(),
        }
    }

    pub fn store(&self) -> &DiskStore {
        self.local.store()
    }

    /// Wait for all background fills started so far.
    pub async fn wait_fills(&self) -> Vec<FillReport> {
        self.fills.wait().await
    }

    /// Forget remembered source failures so those paths are retried.
    pub fn clear_failures(&self) -> usize {
        let mut failures = lock(&self.failures);
        let count = failures.len();
        failures.clear();
        count
    }
}

#[async_trait]
impl FileSystem for CacheFs {
    async fn open(&self, path: &str) -> Result<FileRef> {
        match self.local.open(path).await {
            Ok(file) => {
                // Directories in the mirror only hold cached files
                if !file.stat().await?.is_dir {
                    log_cache_debug!("Cache hit", path = path);
                    return Ok(file);
                }
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

        if !file.stat().await?.is_dir {
            log_cache_debug!("Cache miss, filling in background", path = path);
            let fill = fill_mirror(Arc::clone(&self.source), self.store().clone(), path.to_string());
            self.fills.spawn(path, fill);
        }
        Ok(file)
    }
}

/// Copy `path` from `source` into `store`, publishing it only once complete.
async fn fill_mirror(source: Arc<dyn FileSystem>, store: DiskStore, path: String) -> Result<u64> {
    let file = source.open(&path).await?;
    let staged = {
        let store = store.clone();
        let path = path.clone();
        blocking(move || Ok(store.stage(&path)?)).await?
    };

    let mut out = tokio::fs::File::create(staged.temp_path()).await?;
    let written = copy_to(file.as_ref(), &mut out, None).await?;
    out.sync_all().await?;
    drop(out);

    blocking(move || Ok(staged.commit()?)).await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFs;
    use crate::read_all;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<MemoryFs>, CacheFs) {
        let temp = TempDir::new().unwrap();
        let source = Arc::new(MemoryFs::new());
        let cache = CacheFs::new(source.clone(), DiskStore::new(temp.path()).unwrap());
        (temp, source, cache)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (temp, source, cache) = setup();
        source.insert("artist/song.mp3", b"id3 and audio".to_vec());

        let file = cache.open("artist/song.mp3").await.unwrap();
        assert_eq!(read_all(file.as_ref()).await.unwrap(), b"id3 and audio");

        let reports = cache.wait_fills().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(*reports[0].result.as_ref().unwrap(), 13);
        assert_eq!(
            std::fs::read(temp.path().join("artist/song.mp3")).unwrap(),
            b"id3 and audio"
        );

        let opens = source.open_count("artist/song.mp3");
        let again = cache.open("artist/song.mp3").await.unwrap();
        assert_eq!(read_all(again.as_ref()).await.unwrap(), b"id3 and audio");
        assert_eq!(source.open_count("artist/song.mp3"), opens);
    }

    #[tokio::test]
    async fn test_failure_is_remembered() {
        let (_temp, source, cache) = setup();

        assert!(cache.open("missing.flac").await.err().is_some_and(|e| e.is_not_found()));
        assert!(cache.open("missing.flac").await.err().is_some_and(|e| e.is_not_found()));
        assert_eq!(source.open_count("missing.flac"), 1);

        // A remembered failure wins even after the source recovers
        source.insert("missing.flac", b"late".to_vec());
        assert!(cache.open("missing.flac").await.is_err());

        assert_eq!(cache.clear_failures(), 1);
        let file = cache.open("missing.flac").await.unwrap();
        assert_eq!(read_all(file.as_ref()).await.unwrap(), b"late");
        cache.wait_fills().await;
    }

    #[tokio::test]
    async fn test_source_directory_is_not_filled() {
        let (temp, source, cache) = setup();
        source.insert_dir("artist");

        let dir = cache.open("artist").await.unwrap();
        assert!(dir.stat().await.unwrap().is_dir);
        assert!(cache.wait_fills().await.is_empty());
        assert!(!temp.path().join("artist").exists());
    }

    #[tokio::test]
    async fn test_failed_fill_leaves_no_partial_file() {
        let (temp, source, cache) = setup();
        source.insert_unreadable("a.flac", 10, FsError::Timeout("source stalled".into()));

        // Opening succeeds; the failure only surfaces while copying
        cache.open("a.flac").await.unwrap();
        let reports = cache.wait_fills().await;
        assert!(matches!(reports[0].result, Err(FsError::Timeout(_))));

        assert!(!temp.path().join("a.flac").exists());
        let leftovers = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
