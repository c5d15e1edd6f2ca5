//! # platter-cas
//!
//! Local persistence for the platter media store.
//!
//! Three layers live here, leaves first:
//!
//! - [`DiskStore`]: a byte-range store rooted under a directory. Objects are
//!   addressed by logical path; parent directories are created on first write.
//! - [`ContentIndex`]: the persisted `path -> content hash` mapping, rewritten in
//!   full on every mutation.
//! - [`CafsStore`]: a content-addressable store combining the two. Identical
//!   content reachable under different logical paths is stored once.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! ├── index.json              # {"paths": {"<path>": "<hash>"}}
//! └── content/
//!     └── 3f0c...9a1e         # 40 hex chars, one blob per distinct content
//! ```

mod cafs;
mod index;
mod store;

pub use cafs::{CafsStats, CafsStore, CafsWriter, CONTENT_DIR};
pub use index::{ContentIndex, INDEX_FILE};
pub use store::{DiskStore, Staged};

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length in bytes of a [`ContentHash`].
pub const HASH_LEN: usize = 20;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Corrupt index at {path}: {source}")]
    CorruptIndex {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Content digest used as the storage key of a blob.
///
/// BLAKE3 in extendable-output mode, truncated to [`HASH_LEN`] bytes. Rendered
/// and persisted as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    /// Compute the hash of the given bytes.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(data);
        let mut out = [0u8; HASH_LEN];
        hasher.finalize_xof().fill(&mut out);
        Self(out)
    }

    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex representation (40 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 40-char lowercase hex string.
    ///
    /// Uppercase digits are rejected so that a hash has exactly one textual
    /// form, which is also its blob file name.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != HASH_LEN * 2 || s.bytes().any(|b| b.is_ascii_uppercase()) {
            return None;
        }
        let mut out = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut out).ok()?;
        Some(Self(out))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s).ok_or_else(|| CasError::InvalidPath {
            path: s.to_string(),
        })
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid content hash: {s:?}")))
    }
}
