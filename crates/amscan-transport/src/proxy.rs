//! Outbound proxy selection and tunnelling
//!
//! The scan call can be routed through an HTTP proxy (CONNECT tunnel) or a
//! SOCKS5 proxy. Selection follows the usual `HTTPS_PROXY` / `HTTP_PROXY` /
//! `NO_PROXY` conventions.

use std::io;
use std::net::IpAddr;

use amscan_common::config::ProxySettings;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_HTTPS_PORT: u16 = 443;
const DEFAULT_SOCKS_PORT: u16 = 1080;

/// Upper bound on a CONNECT response header block
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Proxy settings resolved from config or the environment
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    http_proxy: Option<String>,
    https_proxy: Option<String>,
    no_proxy: Vec<String>,
    user: Option<String>,
    pass: Option<String>,
}

impl ProxyConfig {
    pub fn new(
        http_proxy: Option<String>,
        https_proxy: Option<String>,
        no_proxy: Option<&str>,
        user: Option<String>,
        pass: Option<String>,
    ) -> Self {
        Self {
            http_proxy: http_proxy.filter(|s| !s.trim().is_empty()),
            https_proxy: https_proxy.filter(|s| !s.trim().is_empty()),
            no_proxy: parse_no_proxy(no_proxy),
            user,
            pass,
        }
    }

    /// From the `[proxy]` config section
    pub fn from_settings(settings: &ProxySettings) -> Self {
        Self::new(
            settings.http_proxy.clone(),
            settings.https_proxy.clone(),
            settings.no_proxy.as_deref(),
            settings.user.clone(),
            settings.pass.clone(),
        )
    }

    /// From `HTTP_PROXY`, `HTTPS_PROXY`, `NO_PROXY`, `PROXY_USER` and `PROXY_PASS`
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();
        Self::new(
            var("HTTP_PROXY"),
            var("HTTPS_PROXY"),
            var("NO_PROXY").as_deref(),
            var("PROXY_USER"),
            var("PROXY_PASS"),
        )
    }

    /// True when `host` is listed in NO_PROXY
    pub fn bypasses(&self, host: &str) -> bool {
        self.no_proxy.iter().any(|entry| {
            entry == "*"
                || entry == host
                || (entry.starts_with("*.") && host.ends_with(&entry[1..]))
        })
    }

    /// Proxy URL to use for `host`, if any. HTTPS_PROXY wins over HTTP_PROXY.
    pub fn proxy_url_for(&self, host: &str) -> Option<&str> {
        if self.bypasses(host) {
            return None;
        }
        self.https_proxy
            .as_deref()
            .or(self.http_proxy.as_deref())
    }

    /// Proxy credentials, when a non-blank user and a non-empty password are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.pass) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.is_empty() => {
                Some((user.as_str(), pass.as_str()))
            }
            _ => None,
        }
    }

    /// Resolved proxy endpoint for `host`, or None to connect directly.
    ///
    /// An unparseable proxy URL is logged and ignored.
    pub fn endpoint_for(&self, host: &str) -> Option<ProxyEndpoint> {
        let url = self.proxy_url_for(host)?;
        match ProxyEndpoint::parse(url, self.credentials()) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!("Ignoring proxy {}: {}", url, e);
                None
            }
        }
    }
}

fn parse_no_proxy(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// HTTP CONNECT tunnel
    Http,
    /// SOCKS5 with optional username/password
    Socks5,
}

/// A concrete proxy to dial
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    credentials: Option<(String, String)>,
}

impl std::fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

impl ProxyEndpoint {
    /// Parse a proxy URL (`http://`, `https://`, `socks5://`; bare `host:port` means http)
    pub fn parse(proxy_url: &str, credentials: Option<(&str, &str)>) -> Result<Self, String> {
        let trimmed = proxy_url.trim();
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };
        let url = Url::parse(&with_scheme).map_err(|e| e.to_string())?;

        let (kind, default_port) = match url.scheme() {
            "http" => (ProxyKind::Http, DEFAULT_HTTP_PORT),
            "https" => (ProxyKind::Http, DEFAULT_HTTPS_PORT),
            "socks5" | "socks5h" => (ProxyKind::Socks5, DEFAULT_SOCKS_PORT),
            other => return Err(format!("unsupported proxy scheme '{}'", other)),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| "proxy URL has no host".to_string())?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        Ok(Self {
            kind,
            host,
            port: url.port().unwrap_or(default_port),
            credentials: credentials.map(|(u, p)| (u.to_string(), p.to_string())),
        })
    }

    /// Dial the proxy and open a tunnel to `target_host:target_port`
    pub async fn connect(&self, target_host: &str, target_port: u16) -> io::Result<TcpStream> {
        debug!(
            "Tunnelling to {}:{} via {:?} proxy {}:{}",
            target_host, target_port, self.kind, self.host, self.port
        );
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        self.handshake(&mut stream, target_host, target_port).await?;
        Ok(stream)
    }

    /// Run the tunnel handshake over an already connected stream
    pub async fn handshake<S>(&self, stream: &mut S, target_host: &str, target_port: u16) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let credentials = self
            .credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()));
        match self.kind {
            ProxyKind::Http => http_connect(stream, target_host, target_port, credentials).await,
            ProxyKind::Socks5 => socks5_connect(stream, target_host, target_port, credentials).await,
        }
    }
}

fn proxy_error(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, message.into())
}

// ── HTTP CONNECT ────────────────────────────────────────────────────────

async fn http_connect<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    credentials: Option<(&str, &str)>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };

    let mut request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n", authority);
    if let Some((user, pass)) = credentials {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    // Read byte-wise so nothing past the header block is consumed
    let mut response = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() >= MAX_CONNECT_RESPONSE {
            return Err(proxy_error("proxy CONNECT response too large"));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(proxy_error("proxy closed connection during CONNECT"));
        }
        response.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&response);
    let status_line = head.lines().next().unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status != "200" {
        return Err(proxy_error(format!("proxy CONNECT refused: {}", status_line)));
    }
    Ok(())
}

// ── SOCKS5 ──────────────────────────────────────────────────────────────

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_AUTH_NONE: u8 = 0x00;
const SOCKS_AUTH_USER_PASS: u8 = 0x02;
const SOCKS_AUTH_REJECTED: u8 = 0xff;
const SOCKS_CMD_CONNECT: u8 = 0x01;
const SOCKS_ATYP_IPV4: u8 = 0x01;
const SOCKS_ATYP_DOMAIN: u8 = 0x03;
const SOCKS_ATYP_IPV6: u8 = 0x04;

async fn socks5_connect<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    credentials: Option<(&str, &str)>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method negotiation
    let greeting: &[u8] = if credentials.is_some() {
        &[SOCKS_VERSION, 2, SOCKS_AUTH_NONE, SOCKS_AUTH_USER_PASS]
    } else {
        &[SOCKS_VERSION, 1, SOCKS_AUTH_NONE]
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != SOCKS_VERSION {
        return Err(proxy_error(format!("unexpected SOCKS version {}", choice[0])));
    }

    match (choice[1], credentials) {
        (SOCKS_AUTH_NONE, _) => {}
        (SOCKS_AUTH_USER_PASS, Some((user, pass))) => {
            socks5_authenticate(stream, user, pass).await?;
        }
        (SOCKS_AUTH_REJECTED, _) => {
            return Err(proxy_error("SOCKS5 proxy rejected all authentication methods"))
        }
        (method, _) => {
            return Err(proxy_error(format!(
                "SOCKS5 proxy chose unsupported method {}",
                method
            )))
        }
    }

    // Connect request
    let mut request = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(SOCKS_ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(SOCKS_ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            let len = u8::try_from(name.len())
                .map_err(|_| proxy_error("target host name too long for SOCKS5"))?;
            request.push(SOCKS_ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(name);
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[1] != 0x00 {
        return Err(proxy_error(format!(
            "SOCKS5 connect failed with reply code {}",
            reply[1]
        )));
    }

    // Drain the bound address
    let addr_len = match reply[3] {
        SOCKS_ATYP_IPV4 => 4,
        SOCKS_ATYP_IPV6 => 16,
        SOCKS_ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => return Err(proxy_error(format!("unknown SOCKS5 address type {}", other))),
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;
    Ok(())
}

async fn socks5_authenticate<S>(stream: &mut S, user: &str, pass: &str) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user_len =
        u8::try_from(user.len()).map_err(|_| proxy_error("SOCKS5 username too long"))?;
    let pass_len =
        u8::try_from(pass.len()).map_err(|_| proxy_error("SOCKS5 password too long"))?;

    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(0x01);
    request.push(user_len);
    request.extend_from_slice(user.as_bytes());
    request.push(pass_len);
    request.extend_from_slice(pass.as_bytes());
    stream.write_all(&request).await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[1] != 0x00 {
        return Err(proxy_error("SOCKS5 authentication failed"));
    }
    Ok(())
}
