//! Scan target expansion

use std::path::{Path, PathBuf};

use amscan_cloud::ObjectLocator;
use amscan_core::{Error, Result};
use tracing::debug;

/// A single thing to scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Local regular file
    File(PathBuf),
    /// `s3://` or `https://` object
    Remote(String),
}

impl Target {
    /// Name printed alongside the result, without pre-signed credentials
    pub fn display_name(&self) -> String {
        match self {
            Target::File(path) => path.display().to_string(),
            Target::Remote(location) => ObjectLocator::redact(location),
        }
    }
}

/// Expand a command-line target into the objects to scan.
///
/// Directories are walked recursively; symlinks are not followed.
pub async fn expand(target: &str) -> Result<Vec<Target>> {
    if ObjectLocator::is_remote(target) {
        return Ok(vec![Target::Remote(target.to_string())]);
    }

    let path = Path::new(target);
    let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound {
            path: target.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => Error::NoPermission {
            path: target.to_string(),
        },
        _ => Error::Io(e),
    })?;

    if metadata.is_dir() {
        let files = collect_files(path).await?;
        debug!("{} files under {}", files.len(), target);
        Ok(files.into_iter().map(Target::File).collect())
    } else {
        Ok(vec![Target::File(path.to_path_buf())])
    }
}

async fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}
