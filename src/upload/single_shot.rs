//! Single-shot uploader
//!
//! Transfers an entire file as one PutObject request. Used for files at or
//! below the single-shot threshold; atomicity is the store's per-request
//! guarantee, so a failure leaves nothing at the destination. The file is
//! streamed into the request body, so even a just-under-threshold upload
//! holds only a read buffer in memory.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::io::ReaderStream;

use super::{metadata, ObjectDescriptor, UploadError, UploadRequest};
use crate::metrics;
use crate::store::ObjectStore;

/// Uploads a whole file in one request
pub struct SingleShotUploader {
    store: Arc<dyn ObjectStore>,
}

impl SingleShotUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Upload the file referenced by `request`.
    ///
    /// `file_size` is the size read once by the coordinator; it becomes
    /// the declared content length of the streamed body.
    #[tracing::instrument(
        name = "upload.single_shot",
        skip(self, request),
        fields(
            s3.key = %request.key,
            upload.bytes = file_size,
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload(
        &self,
        request: &UploadRequest,
        file_size: u64,
    ) -> Result<ObjectDescriptor, UploadError> {
        let start_time = Instant::now();
        let bucket = self.store.bucket().to_string();
        let sanitized = metadata::sanitize(&request.metadata);

        let file = tokio::fs::File::open(&request.path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        let result = self
            .store
            .put_object(
                &request.key,
                &request.content_type,
                &sanitized,
                file_size,
                body,
            )
            .await;

        let duration = start_time.elapsed();
        metrics::record_upload_duration(&bucket, "single_shot", duration.as_secs_f64());

        match result {
            Ok(response) => {
                metrics::record_upload_success(&bucket, file_size);
                tracing::Span::current().record("s3.etag", response.etag.as_str());
                tracing::info!(
                    etag = %response.etag,
                    bytes = file_size,
                    duration_ms = duration.as_millis(),
                    "Single-shot upload completed"
                );

                Ok(ObjectDescriptor {
                    key: request.key.clone(),
                    name: request.display_name(),
                    size: file_size,
                    uploaded_at: Utc::now(),
                    content_type: request.content_type.clone(),
                    etag: response.etag,
                    metadata: sanitized,
                })
            }
            Err(e) => {
                metrics::record_upload_failure(&bucket);
                metrics::record_error("transport");
                Err(e.into())
            }
        }
    }
}
