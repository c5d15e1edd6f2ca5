//! Remote objects served as chunked files.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use platter_config::log_fetch_debug;
use platter_ipc::ObjectClient;

use crate::chunk::{ChunkOptions, ChunkedStream};
use crate::{lock, FileInfo, FileRef, FileSystem, Result};

/// Opens remote objects through an [`ObjectClient`], returning files that are
/// readable while the download is still in progress.
///
/// Opening a path whose download is still referenced elsewhere attaches to
/// that download instead of fetching the object again.
pub struct ChunkedRemoteFs {
    client: Arc<dyn ObjectClient>,
    options: ChunkOptions,
    inflight: Mutex<HashMap<String, Weak<ChunkedStream>>>,
}

impl ChunkedRemoteFs {
    pub fn new(client: Arc<dyn ObjectClient>, options: ChunkOptions) -> Self {
        Self {
            client,
            options,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &ChunkOptions {
        &self.options
    }

    /// Number of downloads still referenced by an open file.
    pub fn inflight_count(&self) -> usize {
        let mut inflight = lock(&self.inflight);
        inflight.retain(|_, stream| stream.strong_count() > 0);
        inflight.len()
    }

    fn attach(&self, path: &str) -> Option<Arc<ChunkedStream>> {
        let mut inflight = lock(&self.inflight);
        inflight.retain(|_, stream| stream.strong_count() > 0);
        inflight
            .get(path)
            .and_then(Weak::upgrade)
            .filter(|stream| !stream.has_failed())
    }
}

#[async_trait]
impl FileSystem for ChunkedRemoteFs {
    async fn open(&self, path: &str) -> Result<FileRef> {
        if let Some(stream) = self.attach(path) {
            log_fetch_debug!("Attaching to in-flight download", path = path);
            return Ok(stream);
        }

        let object = self.client.fetch(path).await?;
        log_fetch_debug!(
            "Starting chunked download",
            path = path,
            size = object.size,
            name = object.name.as_str()
        );
        let info = FileInfo {
            name: object.name,
            size: object.size,
            mod_time: object.mod_time,
            is_dir: false,
        };
        let stream = ChunkedStream::spawn(object.stream, info, &self.options).await?;

        lock(&self.inflight).insert(path.to_string(), Arc::downgrade(&stream));
        Ok(stream)
    }
}
