use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use crate::Result;

/// Raw object bytes as delivered by a backing store.
pub type ObjectStream = Box<dyn AsyncRead + Send + Unpin>;

/// An object fetched from a remote backing store.
///
/// `name` is advisory. Backends that serve a content-addressable store report
/// the content hash here, which downstream caches rely on for deduplication.
pub struct RemoteObject {
    pub stream: ObjectStream,
    pub name: String,
    pub mod_time: DateTime<Utc>,
    pub size: u64,
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("name", &self.name)
            .field("mod_time", &self.mod_time)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// A source of named objects: a peer process, a bucket, a test double.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Start fetching `path`. The returned stream yields exactly `size` bytes.
    async fn fetch(&self, path: &str) -> Result<RemoteObject>;
}
