//! Remote object content source

use std::sync::Arc;

use amscan_core::source::readable_len;
use amscan_core::{ContentSource, Digests, Error, HashKind, Result};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::aws::{s3_client, S3Object};
use crate::http::HttpObject;

/// Object metadata fetched once when the source is opened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
    /// Provider-supplied SHA-1, hex encoded
    pub sha1: Option<String>,
    /// Provider-supplied SHA-256, hex encoded
    pub sha256: Option<String>,
}

/// Access to one remote object
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Fetch size and, where the provider offers them, checksums
    async fn metadata(&self) -> Result<ObjectMeta>;

    /// Fetch bytes `start..=end`
    async fn get_range(&self, start: u64, end: u64) -> Result<Vec<u8>>;
}

/// URL without its query or fragment, which carry pre-signed credentials
pub fn redacted_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

/// Where a remote object lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectLocator {
    /// `s3://bucket/key`
    S3 { bucket: String, key: String },
    /// Pre-signed `https://` object URL
    Url(Url),
}

impl ObjectLocator {
    /// Parse an `s3://` URI or `https://` URL. Anything else is `FileNotFound`.
    pub fn parse(location: &str) -> Result<Self> {
        let not_found = || Error::FileNotFound {
            path: location.to_string(),
        };
        let url = Url::parse(location).map_err(|_| not_found())?;

        match url.scheme() {
            "s3" => {
                let bucket = url.host_str().filter(|b| !b.is_empty()).ok_or_else(not_found)?;
                let key = url.path().trim_start_matches('/');
                if key.is_empty() {
                    return Err(not_found());
                }
                Ok(ObjectLocator::S3 {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            "https" => Ok(ObjectLocator::Url(url)),
            _ => Err(not_found()),
        }
    }

    /// Name safe to log and report; pre-signed query parameters are dropped
    pub fn display_name(&self) -> String {
        match self {
            ObjectLocator::S3 { bucket, key } => format!("s3://{}/{}", bucket, key),
            ObjectLocator::Url(url) => redacted_url(url),
        }
    }

    /// Redact a raw location string for display
    pub fn redact(location: &str) -> String {
        match Self::parse(location) {
            Ok(locator) => locator.display_name(),
            Err(_) => location
                .split(|c| c == '?' || c == '#')
                .next()
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// True for locators that look like remote objects rather than local paths
    pub fn is_remote(location: &str) -> bool {
        let lower = location.to_ascii_lowercase();
        lower.starts_with("s3://") || lower.starts_with("https://")
    }
}

/// Content source reading a remote object by ranged fetches.
///
/// The backend client is released when the source is dropped.
pub struct RemoteObjectSource {
    identifier: String,
    length: u64,
    digests: Digests,
    backend: Arc<dyn ObjectBackend>,
}

impl std::fmt::Debug for RemoteObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObjectSource")
            .field("identifier", &self.identifier)
            .field("length", &self.length)
            .finish()
    }
}

impl RemoteObjectSource {
    /// Open `location`, building the matching backend.
    ///
    /// The identifier is the redacted location. `region` selects the S3 region; the AWS default chain applies when None.
    /// Digests are only available for `s3://` objects that carry checksums.
    pub async fn open(location: &str, digest: bool, region: Option<&str>) -> Result<Self> {
        let locator = ObjectLocator::parse(location)?;
        let identifier = locator.display_name();
        let backend: Arc<dyn ObjectBackend> = match locator {
            ObjectLocator::S3 { bucket, key } => {
                Arc::new(S3Object::new(s3_client(region).await, bucket, key))
            }
            ObjectLocator::Url(url) => Arc::new(HttpObject::new(url)?),
        };
        Self::with_backend(identifier, backend, digest).await
    }

    /// Open over an explicit backend
    pub async fn with_backend(
        identifier: impl Into<String>,
        backend: Arc<dyn ObjectBackend>,
        digest: bool,
    ) -> Result<Self> {
        let identifier = identifier.into();
        let meta = backend.metadata().await?;
        debug!("Remote object {} is {} bytes", identifier, meta.size);

        let digests = if digest {
            Digests::from_hex(meta.sha1, meta.sha256)
        } else {
            Digests::none()
        };

        Ok(Self {
            identifier,
            length: meta.size,
            digests,
            backend,
        })
    }
}

#[async_trait]
impl ContentSource for RemoteObjectSource {
    fn length(&self) -> u64 {
        self.length
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn hash(&self, kind: HashKind) -> String {
        self.digests.tagged(kind)
    }

    async fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let want = readable_len(self.length, offset, buf.len());
        if want == 0 {
            return Ok(0);
        }

        let bytes = self
            .backend
            .get_range(offset, offset + want as u64 - 1)
            .await?;
        if bytes.len() < want {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{} returned {} of {} bytes at offset {}",
                    self.identifier,
                    bytes.len(),
                    want,
                    offset
                ),
            )));
        }
        buf[..want].copy_from_slice(&bytes[..want]);
        Ok(want)
    }
}
