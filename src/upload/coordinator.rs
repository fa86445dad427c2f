//! Upload coordinator
//!
//! The single call surface for uploads: stats the file once, picks a
//! strategy for its size, and dispatches to the matching uploader.
//! Independent `upload_file` calls share no mutable state, so any number
//! of uploads may run concurrently against the same store.

use std::sync::Arc;

use super::chunked::ChunkedUploader;
use super::single_shot::SingleShotUploader;
use super::{ObjectDescriptor, UploadError, UploadRequest, UploadStrategy};
use crate::config::UploadConfig;
use crate::store::ObjectStore;

/// Dispatches uploads to the single-shot or chunked uploader
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    config: UploadConfig,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, config: UploadConfig) -> Self {
        Self { store, config }
    }

    /// Upload a local file and return its descriptor.
    ///
    /// Fails with [`UploadError::FileAccess`] if the file cannot be
    /// stat'd; any uploader failure is propagated unchanged. No partial
    /// descriptor is ever returned.
    #[tracing::instrument(
        name = "upload.file",
        skip(self, request),
        fields(
            s3.key = %request.key,
            upload.strategy = tracing::field::Empty,
            upload.bytes = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload_file(
        &self,
        request: &UploadRequest,
    ) -> Result<ObjectDescriptor, UploadError> {
        let file_size = tokio::fs::metadata(&request.path).await?.len();

        let strategy = UploadStrategy::decide(file_size, self.config.single_shot_threshold);
        let span = tracing::Span::current();
        span.record("upload.strategy", strategy.as_str());
        span.record("upload.bytes", file_size);
        tracing::info!(
            file = %request.path.display(),
            file_size,
            strategy = strategy.as_str(),
            "Dispatching upload"
        );

        match strategy {
            UploadStrategy::SingleShot => {
                SingleShotUploader::new(self.store.clone())
                    .upload(request, file_size)
                    .await
            }
            UploadStrategy::Chunked => {
                ChunkedUploader::new(
                    self.store.clone(),
                    self.config.part_size,
                    self.config.abort_on_failure,
                )
                .upload(request, file_size)
                .await
            }
        }
    }
}
