//! gRPC transport for the scan call
//!
//! Builds a lazily connected tonic channel (TLS, keep-alive, optional proxy
//! tunnel) and opens one bidirectional `Scan/Run` call per scan.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use amscan_core::{Error, Result};
use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::http::Uri;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tracing::{debug, info};

use crate::credentials::CallCredentials;
use crate::proto::{C2S, S2C, SCAN_RUN_PATH};
use crate::proxy::{ProxyConfig, ProxyEndpoint};
use crate::stream::{ChannelOutbound, OutboundPeer, ScanStream, Transport};

/// HTTP/2 keep-alive ping interval
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// How long to wait for a keep-alive ack
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection establishment timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Chunks buffered ahead of the wire before the session waits
const OUTBOUND_CAPACITY: usize = 4;

/// Server messages buffered ahead of the session
const INBOUND_CAPACITY: usize = 16;

/// Channel settings for [`GrpcTransport::connect`]
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Scanner host, with or without `:port`
    pub host: String,
    pub use_tls: bool,
    /// PEM CA bundle replacing the system roots
    pub ca_cert_path: Option<String>,
    pub proxy: ProxyConfig,
}

/// [`Transport`] over a tonic channel
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    channel: Channel,
    credentials: CallCredentials,
}

impl GrpcTransport {
    /// Build the channel. No connection is made until the first scan.
    pub fn connect(settings: &ChannelSettings, credentials: CallCredentials) -> Result<Self> {
        let (host, port) = split_host_port(&settings.host, settings.use_tls)?;
        let scheme = if settings.use_tls { "https" } else { "http" };
        let authority = if host.contains(':') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };

        let mut endpoint = Endpoint::from_shared(format!("{}://{}", scheme, authority))
            .map_err(|e| Error::Configuration(format!("Invalid scanner address {}: {}", authority, e)))?
            .connect_timeout(CONNECT_TIMEOUT)
            .http2_keep_alive_interval(KEEP_ALIVE_INTERVAL)
            .keep_alive_timeout(KEEP_ALIVE_TIMEOUT)
            .keep_alive_while_idle(true);

        if settings.use_tls {
            let tls = tls_config(&host, settings.ca_cert_path.as_deref())?;
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| Error::Tls(e.to_string()))?;
        }

        let channel = match settings.proxy.endpoint_for(&host) {
            Some(proxy) => {
                info!("Connecting to {} via {:?}", authority, proxy);
                let proxy = Arc::new(proxy);
                endpoint.connect_with_connector_lazy(tower::service_fn(move |uri: Uri| {
                    let proxy = proxy.clone();
                    async move { tunnel(&proxy, uri).await }
                }))
            }
            None => {
                info!("Connecting to {}", authority);
                endpoint.connect_lazy()
            }
        };

        Ok(Self {
            channel,
            credentials,
        })
    }
}

fn tls_config(domain: &str, ca_cert_path: Option<&str>) -> Result<ClientTlsConfig> {
    let tls = ClientTlsConfig::new().domain_name(domain);
    match ca_cert_path {
        Some(path) => {
            let pem = std::fs::read(Path::new(path))
                .map_err(|e| Error::Tls(format!("Failed to read CA certificate {}: {}", path, e)))?;
            Ok(tls.ca_certificate(Certificate::from_pem(pem)))
        }
        None => Ok(tls.with_native_roots()),
    }
}

/// Split `host[:port]`, defaulting the port by scheme
fn split_host_port(target: &str, use_tls: bool) -> Result<(String, u16)> {
    let default_port = if use_tls { 443 } else { 80 };
    let target = target.trim();

    // Bracketed IPv6 literal
    if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| Error::Configuration(format!("Invalid scanner address {}", target)))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p, target)?,
            None => default_port,
        };
        return Ok((host.to_string(), port));
    }

    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Ok((host.to_string(), parse_port(port, target)?)),
        _ => Ok((target.to_string(), default_port)),
    }
}

fn parse_port(port: &str, target: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::Configuration(format!("Invalid port in scanner address {}", target)))
}

/// Open a proxy tunnel to the channel's target
async fn tunnel(proxy: &ProxyEndpoint, uri: Uri) -> std::io::Result<TokioIo<TcpStream>> {
    let host = uri
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "target has no host"))?;
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("https") { 443 } else { 80 });
    let stream = proxy.connect(&host, port).await?;
    Ok(TokioIo::new(stream))
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn open(&self, deadline: Duration) -> Result<ScanStream> {
        let (outbound, peer) = ChannelOutbound::channel(OUTBOUND_CAPACITY);
        let OutboundPeer { messages, aborted } = peer;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let mut grpc = tonic::client::Grpc::new(InterceptedService::new(
            self.channel.clone(),
            self.credentials.clone(),
        ));
        let mut request = Request::new(ReceiverStream::new(messages));
        request.set_timeout(deadline);

        tokio::spawn(async move {
            let call = async {
                grpc.ready()
                    .await
                    .map_err(|e| Status::unavailable(format!("Service was not ready: {}", e)))?;
                let codec: ProstCodec<C2S, S2C> = ProstCodec::default();
                let response = grpc
                    .streaming(request, PathAndQuery::from_static(SCAN_RUN_PATH), codec)
                    .await?;

                let mut inbound = response.into_inner();
                while let Some(message) = inbound.message().await? {
                    if inbound_tx.send(Ok(message)).await.is_err() {
                        break;
                    }
                }
                Ok::<(), Status>(())
            };

            tokio::select! {
                result = call => {
                    if let Err(status) = result {
                        let _ = inbound_tx.send(Err(status)).await;
                    }
                }
                Ok(status) = aborted => {
                    debug!("Scan call cancelled locally: {:?} {}", status.code(), status.message());
                }
            }
        });

        Ok(ScanStream {
            outbound,
            inbound: Box::pin(ReceiverStream::new(inbound_rx)),
        })
    }
}
