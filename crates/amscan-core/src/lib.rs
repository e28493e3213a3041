//! amscan Core - Foundation types for the anti-malware scanning SDK
//!
//! This crate provides the pieces every other amscan crate builds on:
//! - `ContentSource`: the ranged-read contract the scan protocol pulls bytes through
//! - `FileSource` / `BufferSource`: local content source variants
//! - `ScanOptions`: immutable per-scan options with tag validation
//! - `region`: region code to scanner hostname resolution
//! - `ScanResult` / `VerboseScanResult`: the scanner's JSON verdict model
//! - `Error`: the single error type surfaced by scan calls

pub mod error;
pub mod options;
pub mod region;
pub mod result;
pub mod source;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use options::{ScanOptions, ScanOptionsBuilder, MAX_TAGS, MAX_TAG_LEN};
pub use result::{MalwareItem, ScanResult, VerboseScanResult};
pub use source::{BufferSource, ContentSource, Digests, FileSource, HashKind};
