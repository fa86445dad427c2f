//! Upload module
//!
//! Chooses between a single-shot PutObject and a chunked multipart upload
//! based on file size, and produces an [`ObjectDescriptor`] for the stored
//! object.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::StoreError;

pub mod chunked;
pub mod coordinator;
pub mod metadata;
pub mod single_shot;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    /// Local file missing, unreadable, or its size could not be read
    #[error("File access error: {0}")]
    FileAccess(#[from] std::io::Error),

    /// Store rejected a request at any phase; surfaced untranslated
    #[error("Transport error: {0}")]
    Transport(#[from] StoreError),

    /// A recorded part broke the strictly-sequential numbering
    #[error("Part sequencing error: expected part {expected}, got {got}")]
    PartSequencing { expected: u32, got: u32 },
}

/// Everything needed to upload one local file
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Destination object key
    pub key: String,
    /// Local file to upload
    pub path: PathBuf,
    /// Declared content type
    pub content_type: String,
    /// User metadata; entries with `None` values are dropped during
    /// sanitization
    pub metadata: HashMap<String, Option<String>>,
}

impl UploadRequest {
    pub fn new(
        key: impl Into<String>,
        path: impl Into<PathBuf>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            content_type: content_type.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Option<String>>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Display name for the descriptor: the file name portion of the local
    /// path, falling back to the destination key.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.key.clone())
    }
}

/// Descriptor of a successfully stored object.
///
/// Immutable by construction: built only once the store has returned the
/// terminal integrity tag, so no partially-initialized descriptor ever
/// reaches a caller.
#[derive(Debug, Clone)]
pub struct ObjectDescriptor {
    /// Destination object key
    pub key: String,
    /// Display name (local file name)
    pub name: String,
    /// Object size in bytes
    pub size: u64,
    /// When the upload completed
    pub uploaded_at: DateTime<Utc>,
    /// Declared content type
    pub content_type: String,
    /// Integrity tag returned by the store for the whole object
    pub etag: String,
    /// Sanitized metadata as sent to the store
    pub metadata: HashMap<String, String>,
}

/// How a file of a given size should be transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// One PutObject request for the whole file
    SingleShot,
    /// Multipart protocol: initiate, sequential parts, complete
    Chunked,
}

impl UploadStrategy {
    /// Pick a strategy for a file size. The threshold is inclusive on the
    /// single-shot side: a file of exactly the threshold size still goes
    /// up in one request.
    pub fn decide(file_size: u64, single_shot_threshold: u64) -> Self {
        if file_size <= single_shot_threshold {
            UploadStrategy::SingleShot
        } else {
            UploadStrategy::Chunked
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStrategy::SingleShot => "single_shot",
            UploadStrategy::Chunked => "chunked",
        }
    }
}
