//! Byte-range store: plain files under a root directory, addressed by logical path.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::TempPath;
use tracing::instrument;

use crate::{CasError, Result};

/// Persistent object store rooted under a directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Create a store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path onto the filesystem.
    ///
    /// A single leading `/` is ignored. Any component that would leave the
    /// root (`..`, a second root, a drive prefix) is rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let invalid = || CasError::InvalidPath {
            path: path.to_string(),
        };
        if path.contains('\0') {
            return Err(invalid());
        }
        let rel = path.strip_prefix('/').unwrap_or(path);
        let mut resolved = self.root.clone();
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid())
                }
            }
        }
        Ok(resolved)
    }

    /// Open an object for reading.
    #[instrument(skip(self), level = "debug")]
    pub fn open(&self, path: &str) -> Result<File> {
        let full = self.resolve(path)?;
        File::open(&full).map_err(|e| not_found_or_io(e, path))
    }

    /// Read a whole object into memory.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| not_found_or_io(e, path))
    }

    /// Check if an object exists.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    /// Create (or truncate) an object for writing, creating parent directories.
    pub fn create(&self, path: &str) -> Result<File> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(File::create(&full)?)
    }

    /// Reserve a temporary sibling of `path` that can be renamed into place.
    ///
    /// Nothing is visible under `path` until [`Staged::commit`]; dropping the
    /// handle uncommitted removes the temp file.
    pub fn stage(&self, path: &str) -> Result<Staged> {
        let target = self.resolve(path)?;
        let (Some(parent), Some(file_name)) = (target.parent(), target.file_name()) else {
            return Err(CasError::InvalidPath {
                path: path.to_string(),
            });
        };
        fs::create_dir_all(parent)?;
        let prefix = format!(".{}.", file_name.to_string_lossy());
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(parent)?
            .into_temp_path();
        Ok(Staged { temp, target })
    }

    /// Write bytes to `path` atomically using temp file + rename.
    #[instrument(skip(self, data), level = "debug")]
    pub fn write_atomic(&self, path: &str, data: &[u8]) -> Result<()> {
        let staged = self.stage(path)?;
        let mut file = File::create(staged.temp_path())?;
        file.write_all(data)?;
        file.sync_all()?;
        staged.commit()
    }
}

fn not_found_or_io(e: io::Error, path: &str) -> CasError {
    if e.kind() == io::ErrorKind::NotFound {
        CasError::NotFound {
            path: path.to_string(),
        }
    } else {
        CasError::Io(e)
    }
}

/// A pending write: content goes to [`temp_path`](Self::temp_path), then
/// [`commit`](Self::commit) renames it over the target.
///
/// The temp file is removed when the handle is dropped uncommitted.
#[derive(Debug)]
pub struct Staged {
    temp: TempPath,
    target: PathBuf,
}

impl Staged {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn target_path(&self) -> &Path {
        &self.target
    }

    /// Atomically publish the staged content under the target path.
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        match self.temp.persist(&target) {
            Ok(()) => Ok(()),
            // Another writer may have published the same object first
            Err(_) if target.exists() => Ok(()),
            Err(e) => Err(CasError::Io(e.error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_open() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();

        let mut f = store.create("albums/blue/01.flac").unwrap();
        f.write_all(b"fLaC").unwrap();
        drop(f);

        let mut data = Vec::new();
        store
            .open("albums/blue/01.flac")
            .unwrap()
            .read_to_end(&mut data)
            .unwrap();
        assert_eq!(data, b"fLaC");
        assert!(store.exists("/albums/blue/01.flac"));
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();
        assert!(matches!(
            store.open("nope.mp3"),
            Err(CasError::NotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();

        assert!(matches!(
            store.resolve("../etc/passwd"),
            Err(CasError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.resolve("a/../../b"),
            Err(CasError::InvalidPath { .. })
        ));
        assert_eq!(
            store.resolve("/a/./b").unwrap(),
            temp.path().join("a").join("b")
        );
    }

    #[test]
    fn test_staged_write_invisible_until_commit() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();

        let staged = store.stage("covers/x.jpg").unwrap();
        fs::write(staged.temp_path(), b"jpeg").unwrap();
        assert!(!store.exists("covers/x.jpg"));
        staged.commit().unwrap();
        assert_eq!(store.read("covers/x.jpg").unwrap(), b"jpeg");
    }

    #[test]
    fn test_dropped_stage_leaves_nothing_behind() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();

        let staged = store.stage("partial.mp3").unwrap();
        fs::write(staged.temp_path(), b"half").unwrap();
        drop(staged);

        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_two_stores_on_one_root_stage_independently() {
        let temp = TempDir::new().unwrap();
        let a = DiskStore::new(temp.path()).unwrap();
        let b = DiskStore::new(temp.path()).unwrap();

        let first = a.stage("shared.flac").unwrap();
        let second = b.stage("shared.flac").unwrap();
        assert_ne!(first.temp_path(), second.temp_path());
        assert_eq!(first.target_path(), second.target_path());

        fs::write(first.temp_path(), b"one").unwrap();
        fs::write(second.temp_path(), b"two").unwrap();
        first.commit().unwrap();
        second.commit().unwrap();
        assert_eq!(a.read("shared.flac").unwrap(), b"two");

        let leftovers = fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_atomic_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();

        store.write_atomic("a/b.txt", b"one").unwrap();
        store.write_atomic("a/b.txt", b"two").unwrap();
        assert_eq!(store.read("a/b.txt").unwrap(), b"two");
    }
}
