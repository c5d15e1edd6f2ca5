//! Filesystem over a local directory tree.

use std::fs::{self, Metadata};
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use platter_cas::DiskStore;
use tracing::trace;

use crate::{base_name, blocking, File, FileInfo, FileRef, FileSystem, FsError, Result};

/// Serves files below a root directory. Paths escaping the root are rejected.
#[derive(Debug, Clone)]
pub struct LocalFs {
    store: DiskStore,
}

impl LocalFs {
    pub fn new(store: DiskStore) -> Self {
        Self { store }
    }

    /// Serve the directory at `root`, creating it if missing.
    pub fn open_dir<P: AsRef<std::path::Path>>(root: P) -> Result<Self> {
        Ok(Self::new(DiskStore::new(root)?))
    }

    pub fn store(&self) -> &DiskStore {
        &self.store
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn open(&self, path: &str) -> Result<FileRef> {
        let store = self.store.clone();
        let owned = path.to_string();
        let file = blocking(move || {
            let file = store.open(&owned)?;
            Ok(DiskFile::new(file, base_name(&owned))?)
        })
        .await?;
        trace!(path, size = file.info.size, "Opened local file");
        Ok(Arc::new(file))
    }
}

/// An open file on local disk.
#[derive(Debug)]
pub struct DiskFile {
    file: Arc<fs::File>,
    info: FileInfo,
}

impl DiskFile {
    /// Wrap an open file, reporting `name` from [`File::stat`].
    pub fn new(file: fs::File, name: String) -> io::Result<Self> {
        let meta = file.metadata()?;
        Ok(Self {
            file: Arc::new(file),
            info: info_from_metadata(name, &meta),
        })
    }
}

fn info_from_metadata(name: String, meta: &Metadata) -> FileInfo {
    FileInfo {
        name,
        size: if meta.is_dir() { 0 } else { meta.len() },
        mod_time: meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default(),
        is_dir: meta.is_dir(),
    }
}

#[async_trait]
impl File for DiskFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if self.info.is_dir {
            return Err(FsError::IsDirectory(self.info.name.clone()));
        }
        if buf.is_empty() || offset >= self.info.size {
            return Ok(0);
        }
        // Never read past the size reported by stat
        let file = Arc::clone(&self.file);
        let len = (buf.len() as u64).min(self.info.size - offset) as usize;
        let data = blocking(move || Ok(read_full_at(&file, len, offset)?)).await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(self.info.clone())
    }
}

/// Positional read that only stops short at end of file.
fn read_full_at(file: &fs::File, len: usize, offset: u64) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match pread(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(unix)]
fn pread(file: &fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn pread(file: &fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
