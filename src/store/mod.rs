//! Object store module
//!
//! Defines the async request/response surface the uploaders talk to, plus
//! an HTTP implementation for S3-compatible stores. The trait mirrors the
//! five store operations an upload can need: one single-shot write and the
//! initiate/part/complete/abort quartet of the multipart protocol.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod s3;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Response error: {0}")]
    Response(String),
}

/// PutObject response
#[derive(Debug, Clone)]
pub struct PutObjectResponse {
    pub etag: String,
}

/// CreateMultipartUpload response
#[derive(Debug, Clone)]
pub struct CreateMultipartUploadResponse {
    pub upload_id: String,
}

/// UploadPart response
#[derive(Debug, Clone)]
pub struct UploadPartResponse {
    pub etag: String,
}

/// CompleteMultipartUpload response
#[derive(Debug, Clone)]
pub struct CompleteMultipartUploadResponse {
    pub etag: String,
}

/// A part accepted by the store: 1-based part number plus the integrity
/// tag returned for that byte range. Completion assembly requires these
/// in strictly increasing part-number order with no gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Async object-store collaborator.
///
/// Metadata passed to `put_object` and `create_multipart_upload` must
/// already be wire-safe (see [`crate::upload::metadata`]); the store does
/// no further encoding.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this store writes to, used for metrics labels.
    fn bucket(&self) -> &str;

    /// Write an entire object in one request.
    ///
    /// The body is a stream so large objects never materialize in memory;
    /// `content_length` is the declared total the stream will yield.
    async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
        content_length: u64,
        body: reqwest::Body,
    ) -> Result<PutObjectResponse, StoreError>;

    /// Open a multipart upload session for the given key.
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<CreateMultipartUploadResponse, StoreError>;

    /// Upload one byte range of an open session.
    async fn upload_part(
        &self,
        upload_id: &str,
        key: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<UploadPartResponse, StoreError>;

    /// Assemble the object from the ordered part list.
    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        key: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<CompleteMultipartUploadResponse, StoreError>;

    /// Discard an open session and any parts uploaded into it.
    async fn abort_multipart_upload(&self, upload_id: &str, key: &str) -> Result<(), StoreError>;
}
