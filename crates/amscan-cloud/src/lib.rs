//! amscan Cloud - remote objects as scan content
//!
//! This crate provides the remote-object content source:
//! - S3 objects addressed as `s3://bucket/key`, with size and checksums from object metadata
//! - Pre-signed `https://` object URLs, read with HTTP byte-range requests
//!
//! Every `read_range` issues one ranged fetch; nothing is cached locally.

pub mod aws;
pub mod http;
pub mod remote;

pub use aws::S3Object;
pub use http::HttpObject;
pub use remote::{ObjectBackend, ObjectLocator, ObjectMeta, RemoteObjectSource};
