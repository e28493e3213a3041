//! Scan client
//!
//! This module provides the entry point callers use to scan content. It
//! handles:
//! - Resolving the scanner host and building the gRPC transport
//! - Validating options before any network activity
//! - Opening one scan call per scan and sending INIT
//! - Driving the protocol engine and returning its single outcome
//! - Shutting down with in-flight scans cancelled

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use amscan_common::config::DEFAULT_TIMEOUT_SECONDS;
use amscan_common::{Config, TokenType};
use amscan_core::region::resolve_target;
use amscan_core::{BufferSource, ContentSource, Error, FileSource, Result, ScanOptions};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credentials::{CallCredentials, DEFAULT_APP_NAME};
use crate::grpc::{ChannelSettings, GrpcTransport};
use crate::proto::C2S;
use crate::proxy::ProxyConfig;
use crate::session::ScanSession;
use crate::stream::{Outbound, ScanStream, Transport};

/// Largest content the wire's 32-bit range fields can address
pub const MAX_CONTENT_LENGTH: u64 = i32::MAX as u64;

/// How long `close` waits for in-flight scans to release
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Configuration for the scan client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Region the credential belongs to
    pub region: String,
    /// Explicit scanner host[:port]; wins over the region
    pub host: Option<String>,
    /// API key or bearer token
    pub api_key: String,
    pub token_type: TokenType,
    /// Application name sent with each call
    pub app_name: String,
    /// Whole-scan timeout
    pub timeout: Duration,
    pub use_tls: bool,
    /// PEM CA bundle replacing the system roots
    pub ca_cert_path: Option<String>,
    pub proxy: ProxyConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            host: None,
            api_key: String::new(),
            token_type: TokenType::ApiKey,
            app_name: DEFAULT_APP_NAME.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            use_tls: true,
            ca_cert_path: None,
            proxy: ProxyConfig::from_env(),
        }
    }
}

impl ClientConfig {
    pub fn new(region: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Build from a loaded [`Config`]
    pub fn from_config(config: &Config) -> Self {
        let service = &config.service;
        Self {
            region: service.region.clone(),
            host: service.host.clone(),
            api_key: service.api_key.clone().unwrap_or_default(),
            token_type: service.token_type,
            app_name: service.app_name.clone(),
            timeout: Duration::from_secs(service.effective_timeout()),
            use_tls: service.use_tls,
            ca_cert_path: service.ca_cert_path.clone(),
            proxy: ProxyConfig::from_settings(&config.proxy),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn bearer(mut self) -> Self {
        self.token_type = TokenType::Bearer;
        self
    }

    /// Set the timeout; zero selects the default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = effective_timeout(timeout);
        self
    }

    pub fn use_tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        self
    }

    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Resolves once the client is closed
async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn effective_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)
    } else {
        timeout
    }
}

/// Count of scans in flight, with a wakeup when it drops to zero
#[derive(Default)]
struct ActiveScans {
    count: AtomicUsize,
    idle: Notify,
}

impl ActiveScans {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(self.clone())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct ActiveGuard(Arc<ActiveScans>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Client submitting content to the scanner.
///
/// One client can run many scans concurrently; each scan owns its own call
/// and protocol engine.
pub struct ScanClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    active: Arc<ActiveScans>,
}

impl ScanClient {
    /// Resolve the scanner and build the gRPC transport
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let host = resolve_target(&config.region, config.host.as_deref())?;
        let credentials = CallCredentials::new(&config.api_key, config.token_type, &config.app_name)?;

        let settings = ChannelSettings {
            host,
            use_tls: config.use_tls,
            ca_cert_path: config.ca_cert_path.clone(),
            proxy: config.proxy.clone(),
        };
        let transport = GrpcTransport::connect(&settings, credentials)?;
        info!("Scan client ready for {}", settings.host);

        Ok(Self::with_transport(Arc::new(transport), config.timeout))
    }

    /// Build a client over any transport
    pub fn with_transport(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            timeout: effective_timeout(timeout),
            closed: AtomicBool::new(false),
            shutdown,
            active: Arc::new(ActiveScans::default()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Scans currently in flight
    pub fn active_scans(&self) -> usize {
        self.active.count.load(Ordering::SeqCst)
    }

    /// Scan a content source and return the result JSON
    pub async fn scan_run(
        &self,
        source: Arc<dyn ContentSource>,
        options: &ScanOptions,
    ) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        options.validate()?;
        let length = source.length();
        if length > MAX_CONTENT_LENGTH {
            return Err(Error::ContentTooLarge {
                length,
                limit: MAX_CONTENT_LENGTH,
            });
        }

        let _guard = self.active.enter();
        let init = C2S::init(source.as_ref(), options);
        let ScanStream {
            mut outbound,
            inbound,
        } = self.transport.open(self.timeout).await?;

        debug!("Scanning {} ({} bytes)", source.identifier(), length);
        if let Err(e) = outbound.send(init).await {
            // The inbound side reports why the call failed
            warn!("Sending INIT for {} failed: {}", source.identifier(), e);
        }

        let (session, completion) = ScanSession::new(source, outbound, self.timeout, Instant::now());
        let engine = tokio::spawn(session.drive(inbound));

        tokio::select! {
            outcome = completion.wait_for_completion() => {
                let _ = engine.await;
                outcome
            }
            _ = shutdown_signal(self.shutdown.subscribe()) => {
                engine.abort();
                Err(Error::Cancelled)
            }
        }
    }

    /// Scan a local file
    pub async fn scan_file(
        &self,
        path: impl AsRef<Path>,
        digest: bool,
        options: &ScanOptions,
    ) -> Result<String> {
        let source = FileSource::open(path, digest).await?;
        self.scan_run(Arc::new(source), options).await
    }

    /// Scan an in-memory buffer
    pub async fn scan_buffer(
        &self,
        data: impl Into<Vec<u8>>,
        identifier: impl Into<String>,
        digest: bool,
        options: &ScanOptions,
    ) -> Result<String> {
        let source = BufferSource::new(data, identifier, digest);
        self.scan_run(Arc::new(source), options).await
    }

    /// Shut the client down.
    ///
    /// In-flight scans fail with `Cancelled`. Waits at most [`CLOSE_GRACE`]
    /// for them to release their calls. Calling it again does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown.send_replace(true);
        if tokio::time::timeout(CLOSE_GRACE, self.active.wait_idle())
            .await
            .is_err()
        {
            warn!(
                "{} scans still active after {:?}, closing anyway",
                self.active_scans(),
                CLOSE_GRACE
            );
        }
        info!("Scan client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Stage, S2C};
    use crate::stream::ChannelOutbound;
    use amscan_core::HashKind;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Write;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tonic::{Code, Status};

    /// How the scripted scanner behaves after INIT
    #[derive(Clone)]
    enum Script {
        /// Request `fetches` random ranges, then QUIT with `result`
        Serve { fetches: usize, result: String },
        /// Fail the call with a status
        Fail(Code),
        /// Never answer
        Hold,
    }

    #[derive(Default)]
    struct Observed {
        inits: Vec<C2S>,
        chunks: Vec<(i32, i32, Vec<u8>)>,
        aborted: Option<Code>,
    }

    /// Transport whose far end is an in-process scanner script
    struct ScriptedTransport {
        script: Script,
        opens: AtomicUsize,
        observed: Arc<Mutex<Observed>>,
    }

    impl ScriptedTransport {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                opens: AtomicUsize::new(0),
                observed: Arc::new(Mutex::new(Observed::default())),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, _deadline: Duration) -> Result<ScanStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (outbound, mut peer) = ChannelOutbound::channel(4);
            let (tx, rx) = mpsc::channel(16);
            let script = self.script.clone();
            let observed = self.observed.clone();

            tokio::spawn(async move {
                let Some(init) = peer.messages.recv().await else {
                    return;
                };
                let size = init.rs_size as i32;
                observed.lock().unwrap().inits.push(init);

                match script {
                    Script::Serve { fetches, result } => {
                        let mut rng = StdRng::from_entropy();
                        for _ in 0..fetches {
                            let offset = rng.gen_range(0..size);
                            let length = rng.gen_range(1..=size - offset);
                            if tx.send(Ok(S2C::retr(offset, length))).await.is_err() {
                                return;
                            }
                            let Some(chunk) = peer.messages.recv().await else {
                                return;
                            };
                            observed
                                .lock()
                                .unwrap()
                                .chunks
                                .push((offset, length, chunk.chunk));
                        }
                        let _ = tx.send(Ok(S2C::quit(result))).await;
                    }
                    Script::Fail(code) => {
                        let _ = tx.send(Err(Status::new(code, "scripted failure"))).await;
                    }
                    Script::Hold => {
                        if let Ok(status) = peer.aborted.await {
                            observed.lock().unwrap().aborted = Some(status.code());
                        }
                        drop(tx);
                    }
                }
            });

            Ok(ScanStream {
                outbound,
                inbound: Box::pin(ReceiverStream::new(rx)),
            })
        }
    }

    /// Source claiming more bytes than the wire can address
    struct HugeSource;

    #[async_trait]
    impl ContentSource for HugeSource {
        fn length(&self) -> u64 {
            MAX_CONTENT_LENGTH + 1
        }

        fn identifier(&self) -> &str {
            "huge.bin"
        }

        fn hash(&self, _kind: HashKind) -> String {
            String::new()
        }

        async fn read_range(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[tokio::test]
    async fn test_scan_buffer_happy_path() {
        let transport = ScriptedTransport::new(Script::Serve {
            fetches: 5,
            result: r#"{"scanResult":0}"#.into(),
        });
        let client = ScanClient::with_transport(transport.clone(), Duration::from_secs(5));
        let data = sample(50_000);
        let options = ScanOptions::builder().pml(true).tag("unit").build();

        let result = client
            .scan_buffer(data.clone(), "buffer.bin", true, &options)
            .await
            .unwrap();
        assert_eq!(result, r#"{"scanResult":0}"#);

        let observed = transport.observed.lock().unwrap();
        let init = &observed.inits[0];
        assert_eq!(init.stage(), Stage::Init);
        assert_eq!(init.file_name, "buffer.bin");
        assert_eq!(init.rs_size, 50_000);
        assert!(init.bulk);
        assert!(init.trendx);
        assert_eq!(init.tags, vec!["unit".to_string()]);
        assert!(init.file_sha256.starts_with("sha256:"));

        assert_eq!(observed.chunks.len(), 5);
        for (offset, length, chunk) in &observed.chunks {
            let start = *offset as usize;
            assert_eq!(chunk.as_slice(), &data[start..start + *length as usize]);
        }
        assert_eq!(client.active_scans(), 0);
    }

    #[tokio::test]
    async fn test_scan_file_sends_digests() {
        let data = sample(4096);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let transport = ScriptedTransport::new(Script::Serve {
            fetches: 2,
            result: "ok".into(),
        });
        let client = ScanClient::with_transport(transport.clone(), Duration::from_secs(5));
        let result = client
            .scan_file(file.path(), true, &ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(result, "ok");

        let observed = transport.observed.lock().unwrap();
        let expected = amscan_core::Digests::of(&data);
        assert_eq!(observed.inits[0].file_sha1, expected.tagged(HashKind::Sha1));
        assert_eq!(observed.inits[0].file_sha256, expected.tagged(HashKind::Sha256));
    }

    #[tokio::test]
    async fn test_invalid_tags_fail_before_network() {
        let transport = ScriptedTransport::new(Script::Hold);
        let client = ScanClient::with_transport(transport.clone(), Duration::from_secs(5));

        let options = ScanOptions::builder()
            .tags((0..9).map(|i| i.to_string()))
            .build();
        let err = client
            .scan_buffer(vec![1, 2, 3], "t", false, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TooManyTags { .. }));

        let options = ScanOptions::builder().tag("x".repeat(64)).build();
        let err = client
            .scan_buffer(vec![1, 2, 3], "t", false, &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TagTooLong { .. }));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_network() {
        let transport = ScriptedTransport::new(Script::Hold);
        let client = ScanClient::with_transport(transport.clone(), Duration::from_secs(5));
        let err = client
            .scan_file("/no/such/file.bin", true, &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_source_rejected() {
        let transport = ScriptedTransport::new(Script::Hold);
        let client = ScanClient::with_transport(transport.clone(), Duration::from_secs(5));
        let err = client
            .scan_run(Arc::new(HugeSource), &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContentTooLarge { .. }));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_maps_to_auth_failed() {
        let transport = ScriptedTransport::new(Script::Fail(Code::Unauthenticated));
        let client = ScanClient::with_transport(transport, Duration::from_secs(5));
        let err = client
            .scan_buffer(sample(10), "t", false, &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthFailed));
    }

    #[tokio::test]
    async fn test_transport_status_preserved() {
        let transport = ScriptedTransport::new(Script::Fail(Code::Unavailable));
        let client = ScanClient::with_transport(transport, Duration::from_secs(5));
        let err = client
            .scan_buffer(sample(10), "t", false, &ScanOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, Error::Transport { code, .. } if code == Code::Unavailable as i32));
    }

    #[tokio::test]
    async fn test_close_cancels_in_flight_scans() {
        let transport = ScriptedTransport::new(Script::Hold);
        let client = Arc::new(ScanClient::with_transport(
            transport.clone(),
            Duration::from_secs(30),
        ));

        let scanning = client.clone();
        let scan = tokio::spawn(async move {
            scanning
                .scan_buffer(sample(100), "held.bin", false, &ScanOptions::default())
                .await
        });

        while transport.observed.lock().unwrap().inits.is_empty() {
            tokio::task::yield_now().await;
        }

        let started = std::time::Instant::now();
        client.close().await;
        client.close().await;
        assert!(started.elapsed() < Duration::from_secs(2));

        assert!(matches!(scan.await.unwrap(), Err(Error::Cancelled)));
        assert!(matches!(
            client
                .scan_buffer(sample(1), "late", false, &ScanOptions::default())
                .await,
            Err(Error::Cancelled)
        ));

        for _ in 0..100 {
            if transport.observed.lock().unwrap().aborted.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            transport.observed.lock().unwrap().aborted,
            Some(Code::Cancelled)
        );
    }

    #[test]
    fn test_client_config_timeout_default() {
        let config = ClientConfig::new("us-east-1", "key").timeout(Duration::ZERO);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.app_name, "V1FS");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_region_and_missing_key() {
        let err = ScanClient::connect(ClientConfig::new("mars-1", "key"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidRegion { .. }));

        let err = ScanClient::connect(ClientConfig::new("us-east-1", ""))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingAuth));
    }

    #[tokio::test]
    async fn test_connect_from_config() {
        let config = Config::builder()
            .host("127.0.0.1:50051")
            .api_key("key")
            .use_tls(false)
            .build();
        let client = ScanClient::connect(ClientConfig::from_config(&config))
            .await
            .unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(300));
        client.close().await;
    }
}
