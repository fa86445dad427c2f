//! Partwise Library
//!
//! Size-aware file uploader for S3-compatible object stores.
//!
//! # Features
//!
//! - **Strategy Selection**: Single-shot `PutObject` for small files,
//!   chunked multipart upload for large ones
//! - **Sequential Part Loop**: One in-flight part per upload, ordered
//!   completion assembly
//! - **Metadata Sanitization**: Non-ASCII metadata values are escaped
//!   before they cross the wire
//! - **Pluggable Store**: Uploads go through the [`store::ObjectStore`]
//!   trait, with an HTTP S3 implementation included
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use partwise::{config::Config, store::s3::S3Store, upload::coordinator::UploadCoordinator};
//! use partwise::upload::UploadRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let store = Arc::new(S3Store::new(config.s3.clone())?);
//!     let coordinator = UploadCoordinator::new(store, config.upload.clone());
//!
//!     let request = UploadRequest::new("backups/data.bin", "data.bin", "application/octet-stream");
//!     let descriptor = coordinator.upload_file(&request).await?;
//!     println!("Uploaded with ETag: {}", descriptor.etag);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use store::ObjectStore;
pub use upload::coordinator::UploadCoordinator;
pub use upload::{ObjectDescriptor, UploadRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
