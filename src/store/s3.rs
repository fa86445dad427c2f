//! HTTP S3 store
//!
//! Implements [`ObjectStore`] against the S3 REST API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | PutObject | `PUT /{key}` |
//! | CreateMultipartUpload | `POST /{key}?uploads` |
//! | UploadPart | `PUT /{key}?partNumber=N&uploadId=ID` |
//! | CompleteMultipartUpload | `POST /{key}?uploadId=ID` |
//! | AbortMultipartUpload | `DELETE /{key}?uploadId=ID` |
//!
//! User metadata rides on `x-amz-meta-*` headers; multipart bodies are the
//! standard S3 XML documents.

use std::collections::HashMap;

use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use serde::{Deserialize, Serialize};

use super::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse, ObjectStore,
    PutObjectResponse, StoreError, UploadPartResponse,
};
use crate::config::S3Config;

/// Characters escaped in object keys. Path separators stay literal so
/// nested keys map onto nested request paths.
const OBJECT_KEY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// S3-compatible object store over HTTP
pub struct S3Store {
    config: S3Config,
    http_client: reqwest::Client,
}

impl S3Store {
    /// Create a new store from configuration
    pub fn new(config: S3Config) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the endpoint URL
    ///
    /// A configured endpoint is used as-is (path-style, bucket implied);
    /// otherwise the virtual-hosted AWS endpoint for the bucket and region.
    pub fn endpoint(&self) -> String {
        self.config.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.s3.{}.amazonaws.com",
                self.config.bucket, self.config.region
            )
        })
    }

    fn object_url(&self, key: &str) -> String {
        let encoded = utf8_percent_encode(key, OBJECT_KEY);
        format!("{}/{}", self.endpoint(), encoded)
    }

    fn metadata_headers(
        mut request: reqwest::RequestBuilder,
        metadata: &HashMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (key, value) in metadata {
            let name = format!("x-amz-meta-{}", key.to_ascii_lowercase());
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }

    async fn ensure_success(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Response(format!(
            "{} failed with status {}: {}",
            operation, status, body
        )))
    }

    fn etag_header(response: &reqwest::Response, operation: &str) -> Result<String, StoreError> {
        response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                StoreError::Response(format!("{} response missing ETag header", operation))
            })
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, metadata, body),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            http.method = "PUT",
            upload.bytes = content_length,
            s3.etag = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn put_object(
        &self,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
        content_length: u64,
        body: reqwest::Body,
    ) -> Result<PutObjectResponse, StoreError> {
        // The body may be a stream with no intrinsic size, so the
        // declared length goes on the wire explicitly.
        let request = self
            .http_client
            .put(self.object_url(key))
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, content_length);
        let request = Self::metadata_headers(request, metadata);

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let response = Self::ensure_success(response, "PutObject").await?;
        let etag = Self::etag_header(&response, "PutObject")?;

        tracing::Span::current().record("s3.etag", etag.as_str());
        tracing::info!(etag = %etag, "PutObject completed");

        Ok(PutObjectResponse { etag })
    }

    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self, metadata),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            http.method = "POST",
            s3.upload_id = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<CreateMultipartUploadResponse, StoreError> {
        let request = self
            .http_client
            .post(self.object_url(key))
            .query(&[("uploads", "")])
            .header(CONTENT_TYPE, content_type);
        let request = Self::metadata_headers(request, metadata);

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let response = Self::ensure_success(response, "CreateMultipartUpload").await?;

        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Response(e.to_string()))?;
        let result: InitiateMultipartUploadResult = quick_xml::de::from_str(&text)
            .map_err(|e| StoreError::Response(format!("Invalid InitiateMultipartUpload body: {}", e)))?;

        tracing::Span::current().record("s3.upload_id", result.upload_id.as_str());
        tracing::info!(upload_id = %result.upload_id, "CreateMultipartUpload completed");

        Ok(CreateMultipartUploadResponse {
            upload_id: result.upload_id,
        })
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, body),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            http.method = "PUT",
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        upload_id: &str,
        key: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<UploadPartResponse, StoreError> {
        let response = self
            .http_client
            .put(self.object_url(key))
            .query(&[
                ("partNumber", part_number.to_string().as_str()),
                ("uploadId", upload_id),
            ])
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let response = Self::ensure_success(response, "UploadPart").await?;
        let etag = Self::etag_header(&response, "UploadPart")?;

        tracing::Span::current().record("s3.etag", etag.as_str());
        tracing::info!(etag = %etag, part_number = part_number, "UploadPart completed");

        Ok(UploadPartResponse { etag })
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            http.method = "POST",
            parts_count = parts.len(),
            s3.etag = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        key: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<CompleteMultipartUploadResponse, StoreError> {
        let manifest = CompleteMultipartUploadXml {
            parts: parts
                .iter()
                .map(|p| PartXml {
                    part_number: p.part_number,
                    etag: p.etag.clone(),
                })
                .collect(),
        };
        let body = quick_xml::se::to_string(&manifest)
            .map_err(|e| StoreError::Request(format!("Failed to build completion body: {}", e)))?;

        let response = self
            .http_client
            .post(self.object_url(key))
            .query(&[("uploadId", upload_id)])
            .header(CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let response = Self::ensure_success(response, "CompleteMultipartUpload").await?;

        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Response(e.to_string()))?;
        let result: CompleteMultipartUploadResult = quick_xml::de::from_str(&text)
            .map_err(|e| StoreError::Response(format!("Invalid CompleteMultipartUpload body: {}", e)))?;

        tracing::Span::current().record("s3.etag", result.e_tag.as_str());
        tracing::info!(etag = %result.e_tag, parts = parts.len(), "CompleteMultipartUpload completed");

        Ok(CompleteMultipartUploadResponse { etag: result.e_tag })
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            http.method = "DELETE",
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn abort_multipart_upload(&self, upload_id: &str, key: &str) -> Result<(), StoreError> {
        let response = self
            .http_client
            .delete(self.object_url(key))
            .query(&[("uploadId", upload_id)])
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Self::ensure_success(response, "AbortMultipartUpload").await?;

        tracing::info!(upload_id = %upload_id, "AbortMultipartUpload completed");

        Ok(())
    }
}

/// CreateMultipartUpload response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

/// CompleteMultipartUpload request body
#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUploadXml {
    #[serde(rename = "Part")]
    parts: Vec<PartXml>,
}

#[derive(Debug, Serialize)]
struct PartXml {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

/// CompleteMultipartUpload response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CompleteMultipartUploadResult {
    e_tag: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(endpoint: Option<&str>) -> S3Config {
        S3Config {
            bucket: "test-bucket".into(),
            region: "us-east-1".into(),
            endpoint: endpoint.map(str::to_string),
            access_key: None,
            secret_key: None,
        }
    }

    #[test]
    fn test_default_endpoint() {
        let store = S3Store::new(test_config(None)).unwrap();
        assert_eq!(
            store.endpoint(),
            "https://test-bucket.s3.us-east-1.amazonaws.com"
        );
    }

    #[test]
    fn test_custom_endpoint() {
        let store = S3Store::new(test_config(Some("http://localhost:9000"))).unwrap();
        assert_eq!(store.endpoint(), "http://localhost:9000");
    }

    #[test]
    fn test_object_url_escapes_key() {
        let store = S3Store::new(test_config(Some("http://localhost:9000"))).unwrap();
        assert_eq!(
            store.object_url("dir/my file.txt"),
            "http://localhost:9000/dir/my%20file.txt"
        );
    }

    #[test]
    fn test_completion_body_shape() {
        let manifest = CompleteMultipartUploadXml {
            parts: vec![
                PartXml {
                    part_number: 1,
                    etag: "\"etag1\"".into(),
                },
                PartXml {
                    part_number: 2,
                    etag: "\"etag2\"".into(),
                },
            ],
        };
        let body = quick_xml::se::to_string(&manifest).unwrap();
        assert!(body.starts_with("<CompleteMultipartUpload>"));
        assert!(body.contains("<PartNumber>1</PartNumber>"));
        assert!(body.contains("<PartNumber>2</PartNumber>"));
        assert_eq!(body.matches("<Part>").count(), 2);
    }

    #[test]
    fn test_parse_initiate_body() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <InitiateMultipartUploadResult>
                <Bucket>test-bucket</Bucket>
                <Key>test-key.bin</Key>
                <UploadId>upload-id-12345</UploadId>
            </InitiateMultipartUploadResult>"#;
        let result: InitiateMultipartUploadResult = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(result.upload_id, "upload-id-12345");
    }
}
