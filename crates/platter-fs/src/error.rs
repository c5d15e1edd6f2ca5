use std::io;
use std::sync::Arc;

use platter_cas::CasError;
use platter_ipc::{RemoteError, Status};
use thiserror::Error;

/// Errors surfaced by filesystem operations.
///
/// Cloneable so one failure can be handed to every reader of a failed chunk
/// and replayed from the negative cache.
#[derive(Error, Debug, Clone)]
pub enum FsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Remote returned status {status} for {path:?}")]
    Status { status: Status, path: String },

    #[error("Hash mismatch for {path}: source named {expected}, content hashed to {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Timed out {0}")]
    Timeout(String),

    #[error("Object {name} is too large to stream: {size} bytes")]
    TooLarge { name: String, size: u64 },

    #[error("Chunk {index} abandoned before it was filled")]
    Abandoned { index: usize },

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("Remote error: {0}")]
    Remote(Arc<RemoteError>),

    #[error("Store error: {0}")]
    Store(Arc<CasError>),

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        FsError::Io(Arc::new(e))
    }
}

impl From<CasError> for FsError {
    fn from(e: CasError) -> Self {
        match e {
            CasError::NotFound { path } => FsError::NotFound(path),
            CasError::InvalidPath { path } => FsError::InvalidPath(path),
            CasError::AlreadyExists { path } => FsError::AlreadyExists(path),
            CasError::Io(e) => FsError::Io(Arc::new(e)),
            other => FsError::Store(Arc::new(other)),
        }
    }
}

impl From<RemoteError> for FsError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NotFound { path } => FsError::NotFound(path),
            RemoteError::Status { status, path } => match status {
                Status::NotFound => FsError::NotFound(path),
                Status::InvalidPath => FsError::InvalidPath(path),
                Status::IsDirectory => FsError::IsDirectory(path),
                _ => FsError::Status { status, path },
            },
            RemoteError::Timeout(what) => FsError::Timeout(what.to_string()),
            other => FsError::Remote(Arc::new(other)),
        }
    }
}

impl From<tokio::task::JoinError> for FsError {
    fn from(e: tokio::task::JoinError) -> Self {
        FsError::Task(e.to_string())
    }
}
