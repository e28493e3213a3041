//! Pre-signed URL object backend

use std::time::Duration;

use amscan_core::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::remote::{redacted_url, ObjectBackend, ObjectMeta};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Object behind a pre-signed `https://` URL.
///
/// The URL carries its own authorization; no checksums are available.
#[derive(Debug, Clone)]
pub struct HttpObject {
    client: Client,
    url: Url,
}

impl HttpObject {
    pub fn new(url: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, url))
    }

    /// Use an already configured client
    pub fn with_client(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    /// Identifier without the query string, which holds the signature
    fn display_url(&self) -> String {
        redacted_url(&self.url)
    }
}

fn read_error(message: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, message))
}

/// Take `start..=end` out of a full-body response
fn slice_full_body(body: &[u8], start: u64, end: u64) -> Vec<u8> {
    let len = body.len() as u64;
    if start >= len {
        return Vec::new();
    }
    let end = end.min(len - 1);
    body[start as usize..=end as usize].to_vec()
}

#[async_trait]
impl ObjectBackend for HttpObject {
    async fn metadata(&self) -> Result<ObjectMeta> {
        let location = self.display_url();
        let response = self
            .client
            .head(self.url.clone())
            .send()
            .await
            .map_err(|e| Error::Unexpected(format!("HEAD {} failed: {}", location, e)))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::NoPermission { path: location })
            }
            StatusCode::NOT_FOUND => return Err(Error::FileNotFound { path: location }),
            status => {
                return Err(Error::Unexpected(format!(
                    "HEAD {} returned {}",
                    location, status
                )))
            }
        }

        // Read the header directly; a HEAD response has no body to size
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::Unexpected(format!("HEAD {} has no Content-Length", location)))?;
        debug!("HEAD {}: {} bytes", location, size);

        Ok(ObjectMeta {
            size,
            sha1: None,
            sha256: None,
        })
    }

    async fn get_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(|e| read_error(format!("GET {} failed: {}", self.display_url(), e)))?;

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
            return Err(read_error(format!(
                "Expected HTTP 206 Partial Content from {}, got {}",
                self.display_url(),
                status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| read_error(format!("Reading {} failed: {}", self.display_url(), e)))?;

        if status == StatusCode::OK {
            // Server ignored the range
            return Ok(slice_full_body(&body, start, end));
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One canned HTTP/1.1 response, connection closed after it
    fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
        let mut raw = format!("HTTP/1.1 {}\r\nConnection: close\r\n", status);
        for (name, value) in headers {
            raw.push_str(&format!("{}: {}\r\n", name, value));
        }
        raw.push_str("\r\n");
        let mut raw = raw.into_bytes();
        raw.extend_from_slice(body);
        raw
    }

    /// Serve `responses` in order, one per connection, recording request heads
    async fn scripted_peer(responses: Vec<Vec<u8>>) -> (HttpObject, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            for raw in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                seen.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&head).to_ascii_lowercase());
                let _ = stream.write_all(&raw).await;
                let _ = stream.shutdown().await;
            }
        });

        let url = Url::parse(&format!(
            "http://{}/object.bin?X-Amz-Signature=secret",
            addr
        ))
        .unwrap();
        let client = Client::builder().no_proxy().build().unwrap();
        (HttpObject::with_client(client, url), requests)
    }

    #[tokio::test]
    async fn test_head_reports_size() {
        let (object, requests) =
            scripted_peer(vec![response("200 OK", &[("Content-Length", "1234")], b"")]).await;
        let meta = object.metadata().await.unwrap();
        assert_eq!(meta.size, 1234);
        assert!(meta.sha1.is_none() && meta.sha256.is_none());
        assert!(requests.lock().unwrap()[0].starts_with("head /object.bin?"));
    }

    #[tokio::test]
    async fn test_head_status_mapping() {
        for (status, denied, missing) in [
            ("401 Unauthorized", true, false),
            ("403 Forbidden", true, false),
            ("404 Not Found", false, true),
            ("500 Internal Server Error", false, false),
        ] {
            let (object, _) =
                scripted_peer(vec![response(status, &[("Content-Length", "0")], b"")]).await;
            let err = object.metadata().await.unwrap_err();
            match err {
                Error::NoPermission { ref path } => {
                    assert!(denied, "{}", status);
                    assert!(!path.contains("secret"));
                }
                Error::FileNotFound { .. } => assert!(missing, "{}", status),
                Error::Unexpected(ref msg) => {
                    assert!(!denied && !missing, "{}", status);
                    assert!(!msg.contains("secret"));
                }
                other => panic!("unexpected error for {}: {:?}", status, other),
            }
        }
    }

    #[tokio::test]
    async fn test_head_without_content_length() {
        let (object, _) = scripted_peer(vec![response("200 OK", &[], b"")]).await;
        assert!(matches!(object.metadata().await, Err(Error::Unexpected(_))));
    }

    #[tokio::test]
    async fn test_ranged_get_partial_content() {
        let (object, requests) = scripted_peer(vec![response(
            "206 Partial Content",
            &[("Content-Length", "5"), ("Content-Range", "bytes 5-9/20")],
            b"fghij",
        )])
        .await;
        assert_eq!(object.get_range(5, 9).await.unwrap(), b"fghij");
        assert!(requests.lock().unwrap()[0].contains("range: bytes=5-9"));
    }

    #[tokio::test]
    async fn test_ranged_get_full_body_is_sliced() {
        let body: Vec<u8> = (0..20).collect();
        let (object, _) = scripted_peer(vec![response(
            "200 OK",
            &[("Content-Length", "20")],
            &body,
        )])
        .await;
        assert_eq!(object.get_range(5, 9).await.unwrap(), vec![5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_ranged_get_error_status() {
        let (object, _) = scripted_peer(vec![response(
            "403 Forbidden",
            &[("Content-Length", "0")],
            b"",
        )])
        .await;
        let err = object.get_range(0, 9).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn test_slice_full_body() {
        let body: Vec<u8> = (0..100).collect();
        assert_eq!(slice_full_body(&body, 10, 19), (10..20).collect::<Vec<u8>>());
        assert_eq!(slice_full_body(&body, 95, 200), (95..100).collect::<Vec<u8>>());
        assert!(slice_full_body(&body, 100, 120).is_empty());
    }

    #[test]
    fn test_display_url_drops_signature() {
        let url = Url::parse("https://bucket.s3.amazonaws.com/key.bin?X-Amz-Signature=secret").unwrap();
        let object = HttpObject::new(url).unwrap();
        assert_eq!(object.display_url(), "https://bucket.s3.amazonaws.com/key.bin");
    }
}
