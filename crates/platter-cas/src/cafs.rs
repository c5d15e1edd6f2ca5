//! Content-addressable store: a [`DiskStore`] plus a [`ContentIndex`].

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{CasError, ContentHash, ContentIndex, DiskStore, Result, INDEX_FILE};

/// Directory (relative to the store root) holding one blob per distinct hash.
pub const CONTENT_DIR: &str = "content";

#[derive(Debug)]
struct CafsInner {
    store: DiskStore,
    index: ContentIndex,
}

/// Write-once, deduplicating object store keyed by logical path.
///
/// Cloning is cheap; clones share the same index.
#[derive(Debug, Clone)]
pub struct CafsStore {
    inner: Arc<CafsInner>,
}

impl CafsStore {
    /// Open (or initialise) a store rooted at `root`, loading its index.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let store = DiskStore::new(root)?;
        let index = ContentIndex::load(store.root().join(INDEX_FILE))?;
        Ok(Self {
            inner: Arc::new(CafsInner { store, index }),
        })
    }

    /// Logical key of the blob holding `hash`.
    pub fn content_key(hash: &ContentHash) -> String {
        format!("{}/{}", CONTENT_DIR, hash.to_hex())
    }

    pub fn root(&self) -> &Path {
        self.inner.store.root()
    }

    pub fn index(&self) -> &ContentIndex {
        &self.inner.index
    }

    /// Hash mapped to `path`, if any.
    pub fn hash_of(&self, path: &str) -> Option<ContentHash> {
        self.inner.index.get(path)
    }

    /// Whether content with `hash` is already stored.
    pub fn has_content(&self, hash: &ContentHash) -> bool {
        self.inner.index.contains_hash(hash)
    }

    /// Open the content mapped to `path`.
    #[instrument(skip(self), level = "debug")]
    pub fn open_path(&self, path: &str) -> Result<(File, ContentHash)> {
        let hash = self.hash_of(path).ok_or_else(|| CasError::NotFound {
            path: path.to_string(),
        })?;
        let file = self.inner.store.open(&Self::content_key(&hash))?;
        Ok((file, hash))
    }

    /// Read the content mapped to `path` into memory.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let hash = self.hash_of(path).ok_or_else(|| CasError::NotFound {
            path: path.to_string(),
        })?;
        self.inner.store.read(&Self::content_key(&hash))
    }

    /// Start writing a new object under `path`.
    ///
    /// Bytes are buffered in memory until [`CafsWriter::commit`].
    pub fn create(&self, path: &str) -> Result<CafsWriter> {
        if self.inner.index.contains_path(path) {
            return Err(CasError::AlreadyExists {
                path: path.to_string(),
            });
        }
        Ok(CafsWriter {
            cafs: self.clone(),
            path: path.to_string(),
            buf: Vec::new(),
        })
    }

    /// Store `data` under `path`, returning its hash.
    ///
    /// If the content already exists only the mapping is persisted.
    #[instrument(skip(self, data), level = "debug")]
    pub fn put(&self, path: &str, data: &[u8]) -> Result<ContentHash> {
        if self.inner.index.contains_path(path) {
            return Err(CasError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let hash = ContentHash::compute(data);
        if self.has_content(&hash) {
            debug!(path, %hash, "Content already stored, recording mapping only");
        } else {
            self.inner
                .store
                .write_atomic(&Self::content_key(&hash), data)?;
        }
        self.inner.index.add(path, hash)?;
        Ok(hash)
    }

    /// Map `path` to content that is already stored, without any data transfer.
    pub fn link(&self, path: &str, hash: ContentHash) -> Result<()> {
        if !self.has_content(&hash) {
            return Err(CasError::NotFound {
                path: Self::content_key(&hash),
            });
        }
        self.inner.index.add(path, hash)
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> Result<CafsStats> {
        let mut stats = CafsStats {
            paths: self.inner.index.len() as u64,
            ..CafsStats::default()
        };

        let content_dir = self.root().join(CONTENT_DIR);
        let entries = match fs::read_dir(&content_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            // Skip temp files
            if entry.path().extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            if entry.file_type()?.is_file() {
                stats.blobs += 1;
                stats.blob_bytes += entry.metadata()?.len();
            }
        }
        Ok(stats)
    }
}

/// Statistics about a [`CafsStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CafsStats {
    /// Number of mapped logical paths
    pub paths: u64,
    /// Number of distinct blobs on disk
    pub blobs: u64,
    /// Total bytes stored (deduplicated)
    pub blob_bytes: u64,
}

/// Buffered writer returned by [`CafsStore::create`].
#[derive(Debug)]
pub struct CafsWriter {
    cafs: CafsStore,
    path: String,
    buf: Vec<u8>,
}

impl CafsWriter {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hash the buffered bytes and persist them (or just the mapping).
    pub fn commit(self) -> Result<ContentHash> {
        self.cafs.put(&self.path, &self.buf)
    }
}

impl io::Write for CafsWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    #[test]
    fn test_store_and_open() {
        let temp = TempDir::new().unwrap();
        let cafs = CafsStore::open(temp.path()).unwrap();

        let mut w = cafs.create("music/song.mp3").unwrap();
        w.write_all(b"ID3").unwrap();
        w.write_all(b"...frames").unwrap();
        let hash = w.commit().unwrap();

        let (mut file, opened_hash) = cafs.open_path("music/song.mp3").unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"ID3...frames");
        assert_eq!(opened_hash, hash);
        assert!(temp
            .path()
            .join(CONTENT_DIR)
            .join(hash.to_hex())
            .is_file());
    }

    #[test]
    fn test_deduplication() {
        let temp = TempDir::new().unwrap();
        let cafs = CafsStore::open(temp.path()).unwrap();

        let h1 = cafs.put("a/one.flac", b"same bytes").unwrap();
        let h2 = cafs.put("b/two.flac", b"same bytes").unwrap();
        assert_eq!(h1, h2);

        let stats = cafs.stats().unwrap();
        assert_eq!(stats.blobs, 1);
        assert_eq!(stats.paths, 2);
        assert_eq!(cafs.hash_of("a/one.flac"), cafs.hash_of("b/two.flac"));
    }

    #[test]
    fn test_create_existing_path_rejected() {
        let temp = TempDir::new().unwrap();
        let cafs = CafsStore::open(temp.path()).unwrap();

        cafs.put("x", b"1").unwrap();
        assert!(matches!(
            cafs.create("x"),
            Err(CasError::AlreadyExists { .. })
        ));
        assert!(matches!(
            cafs.put("x", b"2"),
            Err(CasError::AlreadyExists { .. })
        ));
        assert_eq!(cafs.read("x").unwrap(), b"1");
    }

    #[test]
    fn test_open_unmapped_is_not_found() {
        let temp = TempDir::new().unwrap();
        let cafs = CafsStore::open(temp.path()).unwrap();
        assert!(matches!(
            cafs.open_path("missing"),
            Err(CasError::NotFound { .. })
        ));
    }

    #[test]
    fn test_link_existing_content() {
        let temp = TempDir::new().unwrap();
        let cafs = CafsStore::open(temp.path()).unwrap();

        let hash = cafs.put("orig", b"payload").unwrap();
        cafs.link("alias", hash).unwrap();
        assert_eq!(cafs.read("alias").unwrap(), b"payload");

        let unknown = ContentHash::compute(b"never stored");
        assert!(matches!(
            cafs.link("other", unknown),
            Err(CasError::NotFound { .. })
        ));
    }

    #[test]
    fn test_empty_content() {
        let temp = TempDir::new().unwrap();
        let cafs = CafsStore::open(temp.path()).unwrap();

        let w = cafs.create("empty").unwrap();
        w.commit().unwrap();
        assert!(cafs.read("empty").unwrap().is_empty());
    }
}
