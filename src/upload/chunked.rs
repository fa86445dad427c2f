//! Chunked (multipart) uploader
//!
//! Three-phase protocol against the object store:
//!
//! 1. **Initiate** - open an upload session, obtain an upload id
//! 2. **Part loop** - split the file into fixed-size ranges and upload
//!    them strictly in sequence, recording the store's tag for each
//! 3. **Complete** - submit the ordered (part number, tag) list; the
//!    store assembles the object and returns the final tag
//!
//! One part is in flight at a time: part N+1 is not read from disk until
//! part N's tag has arrived. Completion only needs the final ordered set
//! of tags, so a bounded concurrent fan-out would be a drop-in throughput
//! improvement without changing assembly.
//!
//! A failure in any part or in completion fails the whole upload with the
//! raw transport error. The open session is left on the store unless
//! `abort_on_failure` is set, in which case a best-effort abort is issued
//! before the error propagates.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{metadata, ObjectDescriptor, UploadError, UploadRequest};
use crate::metrics;
use crate::store::{CompletedPart, ObjectStore};

/// Maximum parts the S3 protocol allows per upload
pub const MAX_PARTS: u64 = 10_000;

/// Number of parts a file of `file_size` splits into: `ceil(size / part_size)`,
/// except that an empty file still produces one (empty) part.
pub fn expected_part_count(file_size: u64, part_size: u64) -> u64 {
    if file_size == 0 {
        1
    } else {
        file_size.div_ceil(part_size)
    }
}

/// Uploads a file through the multipart protocol
pub struct ChunkedUploader {
    store: Arc<dyn ObjectStore>,
    part_size: u64,
    abort_on_failure: bool,
}

impl ChunkedUploader {
    /// Create a new chunked uploader.
    ///
    /// `part_size` is taken as-is; config validation enforces the 5MB
    /// store minimum, and tests use smaller parts deliberately.
    pub fn new(store: Arc<dyn ObjectStore>, part_size: u64, abort_on_failure: bool) -> Self {
        Self {
            store,
            part_size,
            abort_on_failure,
        }
    }

    /// Upload the file referenced by `request`.
    ///
    /// `file_size` is the size read once by the coordinator; it drives the
    /// chunk count even if the file changes underneath (a bounded read
    /// that comes up short fails the upload instead of reading past the
    /// declared total).
    #[tracing::instrument(
        name = "upload.chunked",
        skip(self, request),
        fields(
            s3.key = %request.key,
            upload.bytes = file_size,
            expected_parts = tracing::field::Empty,
            s3.upload_id = tracing::field::Empty,
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

        // Phase 1: initiate. Failure here is fatal and leaves nothing to
        // clean up.
        let created = self
            .store
            .create_multipart_upload(&request.key, &request.content_type, &sanitized)
            .await
            .map_err(UploadError::Transport)?;
        let upload_id = created.upload_id;

        let expected_parts = expected_part_count(file_size, self.part_size);
        let span = tracing::Span::current();
        span.record("s3.upload_id", upload_id.as_str());
        span.record("expected_parts", expected_parts);
        if expected_parts > MAX_PARTS {
            tracing::warn!(
                expected_parts,
                part_size = self.part_size,
                "Part count exceeds the protocol limit; the store will reject part {}",
                MAX_PARTS + 1
            );
        }
        tracing::info!(
            upload_id = %upload_id,
            file_size,
            expected_parts,
            "Initiated chunked upload"
        );

        // Phase 2: sequential part loop.
        let parts = match self.upload_parts(&upload_id, request, file_size).await {
            Ok(parts) => parts,
            Err(e) => {
                return self.fail(&bucket, &upload_id, &request.key, e).await;
            }
        };

        if let Err(e) = verify_sequence(&parts) {
            return self.fail(&bucket, &upload_id, &request.key, e).await;
        }

        // Phase 3: complete with the ordered part list.
        let completed = match self
            .store
            .complete_multipart_upload(&upload_id, &request.key, parts.clone())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return self
                    .fail(&bucket, &upload_id, &request.key, UploadError::Transport(e))
                    .await;
            }
        };

        let duration = start_time.elapsed();
        metrics::record_upload_duration(&bucket, "chunked", duration.as_secs_f64());
        metrics::record_upload_success(&bucket, file_size);
        metrics::record_multipart_parts(parts.len());

        span.record("s3.etag", completed.etag.as_str());
        tracing::info!(
            upload_id = %upload_id,
            etag = %completed.etag,
            parts = parts.len(),
            duration_ms = duration.as_millis(),
            "Chunked upload completed"
        );

        Ok(ObjectDescriptor {
            key: request.key.clone(),
            name: request.display_name(),
            size: file_size,
            uploaded_at: Utc::now(),
            content_type: request.content_type.clone(),
            etag: completed.etag,
            metadata: sanitized,
        })
    }

    /// Split the file into `part_size` ranges and upload them in order.
    ///
    /// The file handle is scoped to this function, so it is closed on
    /// every exit path. A zero-byte file still produces exactly one
    /// (empty) part; an exact multiple of the part size produces no
    /// trailing empty part.
    async fn upload_parts(
        &self,
        upload_id: &str,
        request: &UploadRequest,
        file_size: u64,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let mut file = tokio::fs::File::open(&request.path).await?;
        let mut parts =
            Vec::with_capacity(expected_part_count(file_size, self.part_size) as usize);
        let mut position = 0u64;
        let mut part_number = 1u32;

        loop {
            let length = (file_size - position).min(self.part_size);
            let body = read_range(&mut file, position, length).await?;

            tracing::debug!(part_number, position, length, "Uploading part");

            let response = self
                .store
                .upload_part(upload_id, &request.key, part_number, body)
                .await
                .map_err(UploadError::Transport)?;

            parts.push(CompletedPart {
                part_number,
                etag: response.etag,
            });

            position += length;
            if position >= file_size {
                break;
            }
            part_number += 1;
        }

        Ok(parts)
    }

    /// Record failure metrics, optionally abort the session, and return
    /// the original error.
    async fn fail(
        &self,
        bucket: &str,
        upload_id: &str,
        key: &str,
        error: UploadError,
    ) -> Result<ObjectDescriptor, UploadError> {
        metrics::record_upload_failure(bucket);
        metrics::record_error(match &error {
            UploadError::FileAccess(_) => "file_access",
            UploadError::Transport(_) => "transport",
            UploadError::PartSequencing { .. } => "part_sequencing",
        });

        if self.abort_on_failure {
            if let Err(abort_err) = self.store.abort_multipart_upload(upload_id, key).await {
                tracing::warn!(
                    upload_id = %upload_id,
                    error = %abort_err,
                    "Failed to abort multipart upload"
                );
            }
        } else {
            tracing::warn!(
                upload_id = %upload_id,
                "Leaving multipart session open on the store"
            );
        }

        Err(error)
    }
}

/// Defensive check before completion: part numbers must be exactly
/// `1..=n` with no gaps or duplicates.
fn verify_sequence(parts: &[CompletedPart]) -> Result<(), UploadError> {
    for (index, part) in parts.iter().enumerate() {
        let expected = index as u32 + 1;
        if part.part_number != expected {
            return Err(UploadError::PartSequencing {
                expected,
                got: part.part_number,
            });
        }
    }
    Ok(())
}

/// Read exactly `length` bytes starting at `offset`.
///
/// Seeks into the live file, so a file that shrank since its size was
/// read fails with an EOF error rather than producing a short part.
async fn read_range(
    file: &mut tokio::fs::File,
    offset: u64,
    length: u64,
) -> std::io::Result<Bytes> {
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buffer = vec![0u8; length as usize];
    file.read_exact(&mut buffer).await?;
    Ok(Bytes::from(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        CompleteMultipartUploadResponse, CreateMultipartUploadResponse, MockObjectStore,
        StoreError, UploadPartResponse,
    };
    use std::io::Write;

    const PART: u64 = 1024;

    fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn mock_with_bucket() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store.expect_bucket().return_const("test-bucket".to_string());
        store
    }

    fn expect_create(store: &mut MockObjectStore) {
        store
            .expect_create_multipart_upload()
            .times(1)
            .returning(|_, _, _| {
                Ok(CreateMultipartUploadResponse {
                    upload_id: "upload-1".into(),
                })
            });
    }

    #[test]
    fn test_expected_part_count() {
        assert_eq!(expected_part_count(0, PART), 1);
        assert_eq!(expected_part_count(1, PART), 1);
        assert_eq!(expected_part_count(PART, PART), 1);
        assert_eq!(expected_part_count(PART + 1, PART), 2);
        assert_eq!(expected_part_count(2 * PART, PART), 2);
        assert_eq!(expected_part_count(10 * PART + 7, PART), 11);
    }

    #[test]
    fn test_verify_sequence_rejects_gap() {
        let parts = vec![
            CompletedPart {
                part_number: 1,
                etag: "\"a\"".into(),
            },
            CompletedPart {
                part_number: 3,
                etag: "\"b\"".into(),
            },
        ];
        assert!(matches!(
            verify_sequence(&parts),
            Err(UploadError::PartSequencing {
                expected: 2,
                got: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_zero_byte_file_uploads_one_empty_part() {
        let file = temp_file(b"");

        let mut store = mock_with_bucket();
        expect_create(&mut store);
        store
            .expect_upload_part()
            .withf(|_, _, part_number, body| *part_number == 1 && body.is_empty())
            .times(1)
            .returning(|_, _, _, _| {
                Ok(UploadPartResponse {
                    etag: "\"p1\"".into(),
                })
            });
        store
            .expect_complete_multipart_upload()
            .withf(|_, _, parts| parts.len() == 1 && parts[0].part_number == 1)
            .times(1)
            .returning(|_, _, _| {
                Ok(CompleteMultipartUploadResponse {
                    etag: "\"final\"".into(),
                })
            });

        let request = UploadRequest::new("key", file.path(), "application/octet-stream");
        let uploader = ChunkedUploader::new(Arc::new(store), PART, false);

        let descriptor = uploader.upload(&request, 0).await.unwrap();
        assert_eq!(descriptor.size, 0);
        assert_eq!(descriptor.etag, "\"final\"");
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_trailing_empty_part() {
        let file = temp_file(&vec![b'x'; (2 * PART) as usize]);

        let mut store = mock_with_bucket();
        expect_create(&mut store);
        store
            .expect_upload_part()
            .withf(|_, _, _, body| body.len() as u64 == PART)
            .times(2)
            .returning(|_, _, part_number, _| {
                Ok(UploadPartResponse {
                    etag: format!("\"p{}\"", part_number),
                })
            });
        store
            .expect_complete_multipart_upload()
            .withf(|_, _, parts| {
                parts.len() == 2 && parts[0].part_number == 1 && parts[1].part_number == 2
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(CompleteMultipartUploadResponse {
                    etag: "\"final-2\"".into(),
                })
            });

        let request = UploadRequest::new("key", file.path(), "application/octet-stream");
        let uploader = ChunkedUploader::new(Arc::new(store), PART, false);

        let descriptor = uploader.upload(&request, 2 * PART).await.unwrap();
        assert_eq!(descriptor.etag, "\"final-2\"");
    }

    #[tokio::test]
    async fn test_remainder_becomes_short_final_part() {
        let file = temp_file(&vec![b'x'; (PART + 1) as usize]);

        let mut store = mock_with_bucket();
        expect_create(&mut store);
        store
            .expect_upload_part()
            .withf(|_, _, part_number, body| *part_number == 1 && body.len() as u64 == PART)
            .times(1)
            .returning(|_, _, _, _| {
                Ok(UploadPartResponse {
                    etag: "\"p1\"".into(),
                })
            });
        store
            .expect_upload_part()
            .withf(|_, _, part_number, body| *part_number == 2 && body.len() == 1)
            .times(1)
            .returning(|_, _, _, _| {
                Ok(UploadPartResponse {
                    etag: "\"p2\"".into(),
                })
            });
        store
            .expect_complete_multipart_upload()
            .times(1)
            .returning(|_, _, _| {
                Ok(CompleteMultipartUploadResponse {
                    etag: "\"final\"".into(),
                })
            });

        let request = UploadRequest::new("key", file.path(), "application/octet-stream");
        let uploader = ChunkedUploader::new(Arc::new(store), PART, false);

        uploader.upload(&request, PART + 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_part_failure_never_reaches_completion() {
        let file = temp_file(&vec![b'x'; (3 * PART) as usize]);

        let mut store = mock_with_bucket();
        expect_create(&mut store);
        store
            .expect_upload_part()
            .withf(|_, _, part_number, _| *part_number == 1)
            .times(1)
            .returning(|_, _, _, _| {
                Ok(UploadPartResponse {
                    etag: "\"p1\"".into(),
                })
            });
        store
            .expect_upload_part()
            .withf(|_, _, part_number, _| *part_number == 2)
            .times(1)
            .returning(|_, _, _, _| Err(StoreError::Response("part rejected".into())));
        // Part 3 is never read or submitted, and completion is never called.
        store.expect_complete_multipart_upload().times(0);
        store.expect_abort_multipart_upload().times(0);

        let request = UploadRequest::new("key", file.path(), "application/octet-stream");
        let uploader = ChunkedUploader::new(Arc::new(store), PART, false);

        let err = uploader.upload(&request, 3 * PART).await.unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
    }

    #[tokio::test]
    async fn test_initiate_failure_uploads_nothing() {
        let file = temp_file(b"data");

        let mut store = mock_with_bucket();
        store
            .expect_create_multipart_upload()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Response("quota exceeded".into())));
        store.expect_upload_part().times(0);
        store.expect_complete_multipart_upload().times(0);
        store.expect_abort_multipart_upload().times(0);

        let request = UploadRequest::new("key", file.path(), "application/octet-stream");
        let uploader = ChunkedUploader::new(Arc::new(store), PART, true);

        let err = uploader.upload(&request, 4).await.unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
    }

    #[tokio::test]
    async fn test_abort_on_failure_issues_abort() {
        let file = temp_file(&vec![b'x'; PART as usize]);

        let mut store = mock_with_bucket();
        expect_create(&mut store);
        store
            .expect_upload_part()
            .times(1)
            .returning(|_, _, _, _| Err(StoreError::Response("part rejected".into())));
        store.expect_complete_multipart_upload().times(0);
        store
            .expect_abort_multipart_upload()
            .withf(|upload_id, key| upload_id == "upload-1" && key == "key")
            .times(1)
            .returning(|_, _| Ok(()));

        let request = UploadRequest::new("key", file.path(), "application/octet-stream");
        let uploader = ChunkedUploader::new(Arc::new(store), PART, true);

        let err = uploader.upload(&request, PART).await.unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
    }

    #[tokio::test]
    async fn test_completion_failure_propagates_and_aborts() {
        let file = temp_file(&vec![b'x'; PART as usize]);

        let mut store = mock_with_bucket();
        expect_create(&mut store);
        store.expect_upload_part().times(1).returning(|_, _, _, _| {
            Ok(UploadPartResponse {
                etag: "\"p1\"".into(),
            })
        });
        store
            .expect_complete_multipart_upload()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Response("assembly failed".into())));
        store
            .expect_abort_multipart_upload()
            .times(1)
            .returning(|_, _| Ok(()));

        let request = UploadRequest::new("key", file.path(), "application/octet-stream");
        let uploader = ChunkedUploader::new(Arc::new(store), PART, true);

        let err = uploader.upload(&request, PART).await.unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
    }
}
