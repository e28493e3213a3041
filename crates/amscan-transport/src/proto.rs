//! Wire messages for the `amaas.scan.v1.Scan/Run` streaming call
//!
//! The messages are declared by hand with prost derives so the crate builds
//! without protoc. Field tags must stay in step with the scanner service.

use amscan_core::{ContentSource, HashKind, ScanOptions};

/// Full method path of the bidirectional scan call
pub const SCAN_RUN_PATH: &str = "/amaas.scan.v1.Scan/Run";

/// Protocol phase marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Stage {
    Init = 0,
    Run = 1,
    Fini = 2,
}

/// Server command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Command {
    Retr = 0,
    Quit = 1,
}

/// Client to server message
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct C2S {
    #[prost(enumeration = "Stage", tag = "1")]
    pub stage: i32,
    #[prost(string, tag = "2")]
    pub file_name: String,
    #[prost(int64, tag = "3")]
    pub rs_size: i64,
    #[prost(int32, tag = "4")]
    pub offset: i32,
    #[prost(bytes = "vec", tag = "5")]
    pub chunk: Vec<u8>,
    #[prost(bool, tag = "6")]
    pub trendx: bool,
    #[prost(string, tag = "7")]
    pub file_sha1: String,
    #[prost(string, tag = "8")]
    pub file_sha256: String,
    #[prost(string, repeated, tag = "9")]
    pub tags: Vec<String>,
    #[prost(bool, tag = "10")]
    pub bulk: bool,
    #[prost(bool, tag = "11")]
    pub spn_feedback: bool,
    #[prost(bool, tag = "12")]
    pub verbose: bool,
    #[prost(bool, tag = "13")]
    pub active_content: bool,
}

/// Server to client message
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct S2C {
    #[prost(enumeration = "Stage", tag = "1")]
    pub stage: i32,
    #[prost(enumeration = "Command", tag = "2")]
    pub cmd: i32,
    #[prost(int32, tag = "3")]
    pub offset: i32,
    #[prost(int32, tag = "4")]
    pub length: i32,
    #[prost(string, tag = "5")]
    pub result: String,
    #[prost(int32, repeated, tag = "6")]
    pub bulk_offset: Vec<i32>,
    #[prost(int32, repeated, tag = "7")]
    pub bulk_length: Vec<i32>,
}

impl C2S {
    /// INIT message describing the content about to be scanned.
    ///
    /// The source length must already be known to fit the wire's range fields.
    pub fn init(source: &dyn ContentSource, options: &ScanOptions) -> Self {
        Self {
            stage: Stage::Init as i32,
            file_name: source.identifier().to_string(),
            rs_size: i64::try_from(source.length()).unwrap_or(i64::MAX),
            trendx: options.pml(),
            file_sha1: source.hash(HashKind::Sha1),
            file_sha256: source.hash(HashKind::Sha256),
            tags: options.tags().to_vec(),
            bulk: true,
            spn_feedback: options.feedback(),
            verbose: options.verbose(),
            active_content: options.active_content(),
            ..Default::default()
        }
    }

    /// RUN message carrying one requested range
    pub fn chunk(offset: i32, data: Vec<u8>) -> Self {
        Self {
            stage: Stage::Run as i32,
            offset,
            chunk: data,
            ..Default::default()
        }
    }
}

/// One byte range requested by a RETR command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: i32,
    pub length: i32,
}

impl ByteRange {
    pub fn start(&self) -> u64 {
        self.offset as u64
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl S2C {
    /// RETR message for a single range
    pub fn retr(offset: i32, length: i32) -> Self {
        Self {
            stage: Stage::Run as i32,
            cmd: Command::Retr as i32,
            offset,
            length,
            ..Default::default()
        }
    }

    /// RETR message requesting several ranges at once
    pub fn bulk_retr(ranges: &[(i32, i32)]) -> Self {
        Self {
            stage: Stage::Run as i32,
            cmd: Command::Retr as i32,
            bulk_offset: ranges.iter().map(|r| r.0).collect(),
            bulk_length: ranges.iter().map(|r| r.1).collect(),
            ..Default::default()
        }
    }

    /// QUIT message carrying the result JSON
    pub fn quit(result: impl Into<String>) -> Self {
        Self {
            stage: Stage::Fini as i32,
            cmd: Command::Quit as i32,
            result: result.into(),
            ..Default::default()
        }
    }

    /// Ranges requested by a RETR.
    ///
    /// Bulk arrays win when present; otherwise the single offset/length pair
    /// is used, unless it is unset (`0/0`), which requests nothing.
    /// Mismatched arrays or negative values are rejected.
    pub fn ranges(&self) -> Result<Vec<ByteRange>, String> {
        let ranges: Vec<ByteRange> = if self.bulk_offset.is_empty() && self.bulk_length.is_empty() {
            if self.offset == 0 && self.length == 0 {
                return Ok(Vec::new());
            }
            vec![ByteRange {
                offset: self.offset,
                length: self.length,
            }]
        } else {
            if self.bulk_offset.len() != self.bulk_length.len() {
                return Err(format!(
                    "bulk RETR has {} offsets but {} lengths",
                    self.bulk_offset.len(),
                    self.bulk_length.len()
                ));
            }
            self.bulk_offset
                .iter()
                .zip(&self.bulk_length)
                .map(|(&offset, &length)| ByteRange { offset, length })
                .collect()
        };

        if let Some(bad) = ranges.iter().find(|r| r.offset < 0 || r.length < 0) {
            return Err(format!(
                "invalid RETR range offset={} length={}",
                bad.offset, bad.length
            ));
        }

        Ok(ranges)
    }
}
