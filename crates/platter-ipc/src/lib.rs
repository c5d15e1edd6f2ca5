//! # platter-ipc
//!
//! Wire protocol for fetching one object from a peer process, and the
//! [`ObjectClient`] interface shared by every remote backing store.
//!
//! One request per connection:
//!
//! ```text
//! client -> server   {"Path":"a/b.flac","Label":""}\n
//! server -> client   {"Status":"OK","Size":1234,"ModTime":"...","Name":"..."}\n
//!                    <exactly Size raw bytes, only when Status is OK>
//! ```

pub mod client;
pub mod codec;
pub mod object;

#[cfg(feature = "s3")]
pub mod bucket;

pub use client::PeerClient;
pub use codec::{read_message, with_timeout, write_message, MAX_MESSAGE_SIZE};
pub use object::{ObjectClient, ObjectStream, RemoteObject};

use std::fmt;
use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label routed to the server's default filesystem.
pub const DEFAULT_LABEL: &str = "";

/// Client -> server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    pub path: String,
    pub label: String,
}

impl Request {
    pub fn new(path: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }
}

/// Server -> client message, followed by `size` payload bytes when OK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub status: Status,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub name: String,
}

impl Response {
    pub fn ok(size: u64, mod_time: DateTime<Utc>, name: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            size,
            mod_time,
            name: name.into(),
        }
    }

    /// A refusal carrying no object metadata.
    pub fn error(status: Status) -> Self {
        Self {
            status,
            size: 0,
            mod_time: DateTime::<Utc>::default(),
            name: String::new(),
        }
    }
}

/// Outcome of a request, sent as a two-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    /// No filesystem registered under the requested label
    #[serde(rename = "LF")]
    LabelNotFound,
    /// Opening the path failed for a reason other than the ones below
    #[serde(rename = "PE")]
    PathError,
    /// Path is malformed or escapes the served root
    #[serde(rename = "IP")]
    InvalidPath,
    #[serde(rename = "NF")]
    NotFound,
    /// The object opened but could not be stat'ed
    #[serde(rename = "FE")]
    FileError,
    /// Directories are not transferable
    #[serde(rename = "ED")]
    IsDirectory,
}

impl Status {
    pub fn code(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::LabelNotFound => "LF",
            Status::PathError => "PE",
            Status::InvalidPath => "IP",
            Status::NotFound => "NF",
            Status::FileError => "FE",
            Status::IsDirectory => "ED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors from remote object clients and the wire codec
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Remote returned status {status} for {path:?}")]
    Status { status: Status, path: String },

    #[error("Object not found: {path}")]
    NotFound { path: String },

    #[error("Message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },

    #[error("Connection closed before a complete message")]
    UnexpectedEof,

    #[error("Timed out {0}")]
    Timeout(&'static str),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;
