//! In-memory filesystem and object client, for tests and embedding.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use platter_ipc::{ObjectClient, RemoteError, RemoteObject};

use crate::{base_name, lock, File, FileInfo, FileRef, FileSystem, FsError, Result};

enum Entry {
    File { data: Bytes, info: FileInfo },
    Unreadable { info: FileInfo, error: FsError },
    Dir,
    Fail(FsError),
    FailStat(FsError),
}

/// Map of paths to contents. Counts opens per path.
#[derive(Default)]
pub struct MemoryFs {
    entries: Mutex<HashMap<String, Entry>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        self.insert_named(path, &base_name(path), data);
    }

    /// Insert a file whose [`File::stat`] reports `name`.
    pub fn insert_named(&self, path: &str, name: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let info = FileInfo {
            name: name.to_string(),
            size: data.len() as u64,
            mod_time: Utc::now(),
            is_dir: false,
        };
        lock(&self.entries).insert(path.to_string(), Entry::File { data, info });
    }

    pub fn insert_dir(&self, path: &str) {
        lock(&self.entries).insert(path.to_string(), Entry::Dir);
    }

    /// A file that opens and stats fine but fails every read.
    pub fn insert_unreadable(&self, path: &str, size: u64, error: FsError) {
        let info = FileInfo {
            name: base_name(path),
            size,
            mod_time: Utc::now(),
            is_dir: false,
        };
        lock(&self.entries).insert(path.to_string(), Entry::Unreadable { info, error });
    }

    /// Make every open of `path` fail with `error`.
    pub fn fail(&self, path: &str, error: FsError) {
        lock(&self.entries).insert(path.to_string(), Entry::Fail(error));
    }

    /// Make `path` open fine but fail [`File::stat`] and every read.
    pub fn fail_stat(&self, path: &str, error: FsError) {
        lock(&self.entries).insert(path.to_string(), Entry::FailStat(error));
    }

    pub fn open_count(&self, path: &str) -> usize {
        lock(&self.opens).get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn open(&self, path: &str) -> Result<FileRef> {
        *lock(&self.opens).entry(path.to_string()).or_insert(0) += 1;

        let entries = lock(&self.entries);
        match entries.get(path) {
            Some(Entry::File { data, info }) => Ok(Arc::new(MemoryFile::new(data.clone(), info.clone()))),
            Some(Entry::Unreadable { info, error }) => Ok(Arc::new(UnreadableFile {
                info: info.clone(),
                error: error.clone(),
            })),
            Some(Entry::Dir) => Ok(Arc::new(MemoryFile::new(
                Bytes::new(),
                FileInfo {
                    name: base_name(path),
                    size: 0,
                    mod_time: DateTime::<Utc>::default(),
                    is_dir: true,
                },
            ))),
            Some(Entry::Fail(e)) => Err(e.clone()),
            Some(Entry::FailStat(e)) => Ok(Arc::new(BrokenFile { error: e.clone() })),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }
}

/// A file backed by a byte buffer.
pub struct MemoryFile {
    data: Bytes,
    info: FileInfo,
}

impl MemoryFile {
    pub fn new(data: Bytes, info: FileInfo) -> Self {
        Self { data, info }
    }
}

#[async_trait]
impl File for MemoryFile {
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if self.info.is_dir {
            return Err(FsError::IsDirectory(self.info.name.clone()));
        }
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(self.info.clone())
    }
}

struct UnreadableFile {
    info: FileInfo,
    error: FsError,
}

#[async_trait]
impl File for UnreadableFile {
    async fn read_at(&self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
        Err(self.error.clone())
    }

    async fn stat(&self) -> Result<FileInfo> {
        Ok(self.info.clone())
    }
}

struct BrokenFile {
    error: FsError,
}

#[async_trait]
impl File for BrokenFile {
    async fn read_at(&self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
        Err(self.error.clone())
    }

    async fn stat(&self) -> Result<FileInfo> {
        Err(self.error.clone())
    }
}

/// Object client serving from memory. Counts fetches per path.
#[derive(Default)]
pub struct MemoryClient {
    objects: Mutex<HashMap<String, (String, Bytes)>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        self.insert_named(path, &base_name(path), data);
    }

    pub fn insert_named(&self, path: &str, name: &str, data: impl Into<Bytes>) {
        lock(&self.objects).insert(path.to_string(), (name.to_string(), data.into()));
    }

    pub fn fetch_count(&self, path: &str) -> usize {
        lock(&self.fetches).get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn fetch(&self, path: &str) -> platter_ipc::Result<RemoteObject> {
        *lock(&self.fetches).entry(path.to_string()).or_insert(0) += 1;

        let (name, data) = lock(&self.objects)
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound {
                path: path.to_string(),
            })?;
        Ok(RemoteObject {
            size: data.len() as u64,
            stream: Box::new(Cursor::new(data)),
            name,
            mod_time: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_stat_opens_but_cannot_stat() {
        let fs = MemoryFs::new();
        fs.fail_stat("bad.flac", FsError::Timeout("disk asleep".into()));

        let file = fs.open("bad.flac").await.unwrap();
        assert!(matches!(file.stat().await, Err(FsError::Timeout(_))));
        let mut buf = [0u8; 4];
        assert!(file.read_at(&mut buf, 0).await.is_err());
        assert_eq!(fs.open_count("bad.flac"), 1);
    }
}
