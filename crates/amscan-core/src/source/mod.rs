//! Content sources
//!
//! A content source is anything the scanner can pull bytes from. Every
//! variant exposes the same contract:
//! - `length`: total content size in bytes
//! - `identifier`: name reported to the scanner (path, buffer name, object URI)
//! - `hash`: `sha1:<hex>` / `sha256:<hex>` digest, or empty when unavailable
//! - `read_range`: ranged reads that never go past `length`
//!
//! Local variants live here ([`FileSource`], [`BufferSource`]); the remote
//! object variant lives in `amscan-cloud`.

mod buffer;
mod file;

pub use buffer::BufferSource;
pub use file::FileSource;

use async_trait::async_trait;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::Result;

/// Digest algorithms a content source can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Sha1,
    Sha256,
}

impl HashKind {
    /// Algorithm tag prefixed to the hex digest
    pub fn prefix(&self) -> &'static str {
        match self {
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
        }
    }
}

/// Capability set shared by every content source variant
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Total content length in bytes
    fn length(&self) -> u64;

    /// Identifier reported to the scanner
    fn identifier(&self) -> &str;

    /// Tagged hex digest (`sha1:<hex>`), or an empty string if digesting
    /// was disabled or the digest is not available
    fn hash(&self, kind: HashKind) -> String;

    /// Fill `buf` with content starting at `offset`.
    ///
    /// Returns the number of bytes read: 0 when `offset >= length`, otherwise
    /// `min(buf.len(), length - offset)`. Content that turns out shorter
    /// than `length` is an `Io` error, never a short read.
    async fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Number of bytes a ranged read at `offset` should return for content of
/// `length` bytes and a buffer of `capacity` bytes
pub fn readable_len(length: u64, offset: u64, capacity: usize) -> usize {
    if offset >= length {
        return 0;
    }
    let remaining = length - offset;
    if remaining < capacity as u64 {
        remaining as usize
    } else {
        capacity
    }
}

/// SHA-1 and SHA-256 digests of a content source, stored as lowercase hex
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Digests {
    sha1: Option<String>,
    sha256: Option<String>,
}

impl Digests {
    /// No digests available
    pub fn none() -> Self {
        Self::default()
    }

    /// Compute both digests over an in-memory buffer
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = DigestHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Build from already-known hex digests (e.g. object store checksums)
    pub fn from_hex(sha1: Option<String>, sha256: Option<String>) -> Self {
        Self {
            sha1: sha1.filter(|s| !s.is_empty()).map(|s| s.to_ascii_lowercase()),
            sha256: sha256.filter(|s| !s.is_empty()).map(|s| s.to_ascii_lowercase()),
        }
    }

    /// Raw hex digest for the given algorithm
    pub fn hex(&self, kind: HashKind) -> Option<&str> {
        match kind {
            HashKind::Sha1 => self.sha1.as_deref(),
            HashKind::Sha256 => self.sha256.as_deref(),
        }
    }

    /// Tagged digest (`sha256:<hex>`) or empty string
    pub fn tagged(&self, kind: HashKind) -> String {
        match self.hex(kind) {
            Some(hex) => format!("{}:{}", kind.prefix(), hex),
            None => String::new(),
        }
    }
}

/// Incremental SHA-1 + SHA-256 computation over streamed content
pub struct DigestHasher {
    sha1: Sha1,
    sha256: Sha256,
}

impl DigestHasher {
    pub fn new() -> Self {
        Self {
            sha1: Sha1::new(),
            sha256: Sha256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        self.sha256.update(data);
    }

    pub fn finish(self) -> Digests {
        Digests {
            sha1: Some(hex::encode(self.sha1.finalize())),
            sha256: Some(hex::encode(self.sha256.finalize())),
        }
    }
}

impl Default for DigestHasher {
    fn default() -> Self {
        Self::new()
    }
}
