//! Persisted `path -> content hash` index.
//!
//! The whole document is rewritten on every mutation while the write lock is
//! held, so persisted writes happen in the same order as in-memory mutations.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CasError, ContentHash, Result};

/// File name of the index document inside a store root.
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    paths: BTreeMap<String, ContentHash>,
}

#[derive(Debug, Default)]
struct IndexState {
    paths: BTreeMap<String, ContentHash>,
    /// Value set of `paths`, kept for O(1) existence checks.
    hashes: HashSet<ContentHash>,
}

/// Mapping of logical paths to content hashes, backed by a JSON document.
#[derive(Debug)]
pub struct ContentIndex {
    location: PathBuf,
    state: RwLock<IndexState>,
}

impl ContentIndex {
    /// Load the index stored at `location`.
    ///
    /// A missing document yields an empty index; a malformed one is an error.
    pub fn load<P: AsRef<Path>>(location: P) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        let document = match fs::read(&location) {
            Ok(bytes) => serde_json::from_slice::<IndexDocument>(&bytes).map_err(|source| {
                CasError::CorruptIndex {
                    path: location.display().to_string(),
                    source,
                }
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => IndexDocument::default(),
            Err(e) => return Err(e.into()),
        };

        let hashes = document.paths.values().copied().collect();
        debug!(
            location = %location.display(),
            paths = document.paths.len(),
            "Loaded content index"
        );
        Ok(Self {
            location,
            state: RwLock::new(IndexState {
                paths: document.paths,
                hashes,
            }),
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Hash mapped to `path`, if any.
    pub fn get(&self, path: &str) -> Option<ContentHash> {
        self.read().paths.get(path).copied()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.read().paths.contains_key(path)
    }

    /// Whether any path maps to `hash`.
    pub fn contains_hash(&self, hash: &ContentHash) -> bool {
        self.read().hashes.contains(hash)
    }

    /// Number of mapped paths.
    pub fn len(&self) -> usize {
        self.read().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct hashes.
    pub fn hash_count(&self) -> usize {
        self.read().hashes.len()
    }

    /// Snapshot of all mappings.
    pub fn entries(&self) -> BTreeMap<String, ContentHash> {
        self.read().paths.clone()
    }

    /// Snapshot of the hash set.
    pub fn hashes(&self) -> HashSet<ContentHash> {
        self.read().hashes.clone()
    }

    /// Record `path -> hash` and flush the document.
    ///
    /// Paths are write-once: mapping an already mapped path fails with
    /// [`CasError::AlreadyExists`] and leaves the index untouched.
    pub fn add(&self, path: &str, hash: ContentHash) -> Result<()> {
        let mut state = self.write();
        if state.paths.contains_key(path) {
            return Err(CasError::AlreadyExists {
                path: path.to_string(),
            });
        }
        state.paths.insert(path.to_string(), hash);
        let inserted_hash = state.hashes.insert(hash);

        if let Err(e) = self.flush(&state) {
            // Keep memory consistent with what is on disk
            state.paths.remove(path);
            if inserted_hash {
                state.hashes.remove(&hash);
            }
            return Err(e);
        }
        Ok(())
    }

    fn flush(&self, state: &IndexState) -> Result<()> {
        let document = IndexDocument {
            paths: state.paths.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.location.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = self.location.with_extension("json.tmp");
        let mut file = fs::File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp, &self.location)?;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
