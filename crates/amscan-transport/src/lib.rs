//! amscan Transport - streaming scan protocol over gRPC
//!
//! This crate provides:
//! - Wire messages for the `amaas.scan.v1.Scan/Run` bidirectional call
//! - The scan session protocol engine that answers the scanner's range requests
//! - The transport seam and its tonic implementation (TLS, credentials, proxies)
//! - `ScanClient`, the orchestrator callers use to run scans

pub mod client;
pub mod credentials;
pub mod grpc;
pub mod proto;
pub mod proxy;
pub mod session;
pub mod stream;

pub use client::{ClientConfig, ScanClient, MAX_CONTENT_LENGTH};
pub use credentials::CallCredentials;
pub use grpc::{ChannelSettings, GrpcTransport};
pub use proxy::{ProxyConfig, ProxyEndpoint, ProxyKind};
pub use session::{Completion, Phase, ScanSession, SessionStats};
pub use stream::{ChannelOutbound, Outbound, ScanStream, Transport};
