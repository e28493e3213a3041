//! In-memory buffer content source

use async_trait::async_trait;

use super::{readable_len, ContentSource, Digests, HashKind};
use crate::Result;

/// Content source wrapping an in-memory byte sequence
#[derive(Debug, Clone)]
pub struct BufferSource {
    identifier: String,
    data: Vec<u8>,
    digests: Digests,
}

impl BufferSource {
    /// Wrap `data`; when `digest` is set both digests are computed up front
    pub fn new(data: impl Into<Vec<u8>>, identifier: impl Into<String>, digest: bool) -> Self {
        let data = data.into();
        let digests = if digest {
            Digests::of(&data)
        } else {
            Digests::none()
        };

        Self {
            identifier: identifier.into(),
            data,
            digests,
        }
    }

    /// Borrow the wrapped bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[async_trait]
impl ContentSource for BufferSource {
    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn hash(&self, kind: HashKind) -> String {
        self.digests.tagged(kind)
    }

    async fn read_range(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let n = readable_len(self.length(), offset, buf.len());
        if n > 0 {
            let start = offset as usize;
            buf[..n].copy_from_slice(&self.data[start..start + n]);
        }
        Ok(n)
    }
}
