//! S3 object backend

use amscan_core::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::types::ChecksumMode;
use aws_sdk_s3::Client as S3Client;
use base64::Engine;
use tracing::{debug, warn};

use crate::remote::{ObjectBackend, ObjectMeta};

/// Build an S3 client from the environment/profile, optionally pinning the region
pub async fn s3_client(region: Option<&str>) -> S3Client {
    let mut loader = aws_config::from_env();
    if let Some(region) = region {
        loader = loader.region(aws_config::Region::new(region.to_string()));
    }
    S3Client::new(&loader.load().await)
}

/// One object in an S3 bucket
#[derive(Debug, Clone)]
pub struct S3Object {
    client: S3Client,
    bucket: String,
    key: String,
}

impl S3Object {
    pub fn new(client: S3Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Map a metadata failure to the caller-facing error
fn metadata_error<E>(err: SdkError<E, HttpResponse>, location: String) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(401) | Some(403) => Error::NoPermission { path: location },
        Some(404) => Error::FileNotFound { path: location },
        _ => {
            warn!("Metadata lookup for {} failed: {}", location, DisplayErrorContext(&err));
            Error::Unexpected(format!("{}: {}", location, DisplayErrorContext(&err)))
        }
    }
}

fn read_error(message: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, message))
}

/// Decode an S3 base64 checksum to hex.
///
/// Multipart objects carry composite checksums (`<b64>-<parts>`), which are
/// not digests of the content and are skipped.
pub fn checksum_hex(checksum: &str) -> Option<String> {
    if checksum.contains('-') {
        return None;
    }
    base64::engine::general_purpose::STANDARD
        .decode(checksum)
        .ok()
        .map(hex::encode)
}

#[async_trait]
impl ObjectBackend for S3Object {
    async fn metadata(&self) -> Result<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .checksum_mode(ChecksumMode::Enabled)
            .send()
            .await
            .map_err(|e| metadata_error(e, self.location()))?;

        let size = output.content_length().unwrap_or(0).max(0) as u64;
        debug!("HeadObject {}: {} bytes", self.location(), size);

        Ok(ObjectMeta {
            size,
            sha1: output.checksum_sha1().and_then(checksum_hex),
            sha256: output.checksum_sha256().and_then(checksum_hex),
        })
    }

    async fn get_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(|e| {
                read_error(format!(
                    "Failed to read {} bytes {}-{}: {}",
                    self.location(),
                    start,
                    end,
                    DisplayErrorContext(&e)
                ))
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| read_error(format!("Failed to read {} body: {}", self.location(), e)))?;
        Ok(body.into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_hex() {
        // SHA-1 of "hello world"
        assert_eq!(
            checksum_hex("Kq5sNclPz7QV2+lfQIuc6R7oRu0=").as_deref(),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );
        assert!(checksum_hex("Kq5sNclPz7QV2+lfQIuc6R7oRu0=-3").is_none());
        assert!(checksum_hex("not base64!").is_none());
    }
}
