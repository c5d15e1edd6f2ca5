//! Filesystem combinators.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::{FileRef, FileSystem, FsError, Result};

/// Tries each filesystem in order and returns the first successful open.
///
/// When every member fails, the error from the last one is returned.
#[derive(Default, Clone)]
pub struct MultiFs {
    systems: Vec<Arc<dyn FileSystem>>,
}

impl MultiFs {
    pub fn new(systems: Vec<Arc<dyn FileSystem>>) -> Self {
        Self { systems }
    }

    pub fn push(&mut self, fs: Arc<dyn FileSystem>) {
        self.systems.push(fs);
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

#[async_trait]
impl FileSystem for MultiFs {
    async fn open(&self, path: &str) -> Result<FileRef> {
        let mut last = None;
        for (i, fs) in self.systems.iter().enumerate() {
            match fs.open(path).await {
                Ok(file) => return Ok(file),
                Err(e) => {
                    trace!(path, member = i, error = %e, "Open failed, trying next");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| FsError::NotFound(path.to_string())))
    }
}

/// Rewrites paths before delegating to another filesystem.
///
/// `trim_prefix` is removed when present, then `add_prefix` is prepended.
/// Both are plain string operations.
#[derive(Clone)]
pub struct PathRewrite {
    inner: Arc<dyn FileSystem>,
    trim_prefix: String,
    add_prefix: String,
}

impl PathRewrite {
    pub fn new(inner: Arc<dyn FileSystem>) -> Self {
        Self {
            inner,
            trim_prefix: String::new(),
            add_prefix: String::new(),
        }
    }

    pub fn with_trim_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.trim_prefix = prefix.into();
        self
    }

    pub fn with_add_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.add_prefix = prefix.into();
        self
    }

    pub fn rewrite(&self, path: &str) -> String {
        let rest = path.strip_prefix(&self.trim_prefix).unwrap_or(path);
        format!("{}{}", self.add_prefix, rest)
    }
}

#[async_trait]
impl FileSystem for PathRewrite {
    async fn open(&self, path: &str) -> Result<FileRef> {
        let rewritten = self.rewrite(path);
        trace!(from = path, to = %rewritten, "Rewrote path");
        self.inner.open(&rewritten).await
    }
}
