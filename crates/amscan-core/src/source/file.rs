//! Local file content source

use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::{readable_len, ContentSource, DigestHasher, Digests, HashKind};
use crate::{Error, Result};

/// Read buffer size used while digesting
const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// Content source backed by a local file
///
/// The file length is captured at open time; reads never go past it even if
/// the file grows afterwards.
#[derive(Debug)]
pub struct FileSource {
    path: String,
    length: u64,
    digests: Digests,
    file: Mutex<File>,
}

impl FileSource {
    /// Open `path` for scanning.
    ///
    /// With `digest` set the whole file is streamed once to compute SHA-1 and
    /// SHA-256 before the random-access handle is opened.
    pub async fn open(path: impl AsRef<Path>, digest: bool) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| open_error(e, &display))?;
        if metadata.is_dir() {
            return Err(Error::FileNotFound { path: display });
        }

        let digests = if digest {
            let mut file = File::open(path).await.map_err(|e| open_error(e, &display))?;
            digest_file(&mut file).await?
        } else {
            Digests::none()
        };

        let file = File::open(path).await.map_err(|e| open_error(e, &display))?;
        debug!("Opened {} ({} bytes)", path.display(), metadata.len());

        Ok(Self {
            path: display,
            length: metadata.len(),
            digests,
            file: Mutex::new(file),
        })
    }
}

fn open_error(err: std::io::Error, path: &str) -> Error {
    match err.kind() {
        ErrorKind::PermissionDenied => Error::NoPermission {
            path: path.to_string(),
        },
        ErrorKind::NotFound => Error::FileNotFound {
            path: path.to_string(),
        },
        _ => Error::Io(err),
    }
}

async fn digest_file(file: &mut File) -> Result<Digests> {
    let mut hasher = DigestHasher::new();
    let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finish())
}

#[async_trait]
impl ContentSource for FileSource {
    fn length(&self) -> u64 {
        self.length
    }

    fn identifier(&self) -> &str {
        &self.path
    }

    fn hash(&self, kind: HashKind) -> String {
        self.digests.tagged(kind)
    }

    async fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let want = readable_len(self.length, offset, buf.len());
        if want == 0 {
            return Ok(0);
        }

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut filled = 0;
        while filled < want {
            let n = file.read(&mut buf[filled..want]).await?;
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!(
                        "{} ended at {} bytes, expected {}",
                        self.path,
                        offset + filled as u64,
                        self.length
                    ),
                )));
            }
            filled += n;
        }

        Ok(want)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture(len: usize) -> (NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        (file, data)
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let err = FileSource::open("/definitely/not/here.bin", true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_open_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path(), false).await.unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_ranges_match_content() {
        let (file, data) = fixture(200_000);
        let source = FileSource::open(file.path(), false).await.unwrap();
        assert_eq!(source.length(), data.len() as u64);

        for (offset, len) in [(0usize, 1usize), (17, 4096), (65_536, 70_000), (199_990, 10)] {
            let mut buf = vec![0u8; len];
            let n = source.read_range(offset as u64, &mut buf).await.unwrap();
            assert_eq!(n, len);
            assert_eq!(&buf[..], &data[offset..offset + len]);
        }
    }

    #[tokio::test]
    async fn test_read_past_end() {
        let (file, data) = fixture(1000);
        let source = FileSource::open(file.path(), false).await.unwrap();

        let mut buf = vec![0u8; 64];
        assert_eq!(source.read_range(1000, &mut buf).await.unwrap(), 0);

        let n = source.read_range(990, &mut buf).await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(&buf[..n], &data[990..]);
    }

    #[tokio::test]
    async fn test_file_shrunk_after_open() {
        let (file, _) = fixture(1000);
        let source = FileSource::open(file.path(), false).await.unwrap();
        file.as_file().set_len(10).unwrap();

        let mut buf = vec![0u8; 100];
        let err = source.read_range(0, &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == ErrorKind::UnexpectedEof));
        assert_eq!(source.length(), 1000);
    }

    #[tokio::test]
    async fn test_digest_matches_buffer_digest() {
        let (file, data) = fixture(150_000);
        let source = FileSource::open(file.path(), true).await.unwrap();
        let expected = Digests::of(&data);
        assert_eq!(source.hash(HashKind::Sha1), expected.tagged(HashKind::Sha1));
        assert_eq!(source.hash(HashKind::Sha256), expected.tagged(HashKind::Sha256));
        assert_eq!(source.identifier(), file.path().display().to_string());
    }

    #[tokio::test]
    async fn test_digest_disabled() {
        let (file, _) = fixture(10);
        let source = FileSource::open(file.path(), false).await.unwrap();
        assert_eq!(source.hash(HashKind::Sha256), "");
    }
}
