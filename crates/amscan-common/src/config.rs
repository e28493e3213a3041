//! Configuration management for amscan clients

use amscan_core::{Error, Result, ScanOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default scan timeout, applied when the configured timeout is zero
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scanner service connection settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Outbound proxy settings
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Per-scan defaults
    #[serde(default)]
    pub scan: ScanConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (AMSCAN_ prefix, plus the usual proxy variables)
    pub fn merge_env(self) -> Self {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    /// Merge values from an arbitrary variable lookup
    pub fn merge_vars<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Service settings
        if let Some(val) = var("AMSCAN_REGION") {
            self.service.region = val;
        }
        if let Some(val) = var("AMSCAN_HOST") {
            self.service.host = Some(val);
        }
        if let Some(val) = var("AMSCAN_API_KEY") {
            self.service.api_key = Some(val);
        }
        if let Some(val) = var("AMSCAN_TIMEOUT") {
            if let Ok(n) = val.trim().parse() {
                self.service.timeout_seconds = n;
            }
        }

        // Proxy settings; upper-case wins over lower-case
        let either = |upper: &str, lower: &str| var(upper).or_else(|| var(lower));
        if let Some(val) = either("HTTP_PROXY", "http_proxy") {
            self.proxy.http_proxy = Some(val);
        }
        if let Some(val) = either("HTTPS_PROXY", "https_proxy") {
            self.proxy.https_proxy = Some(val);
        }
        if let Some(val) = either("NO_PROXY", "no_proxy") {
            self.proxy.no_proxy = Some(val);
        }
        if let Some(val) = var("PROXY_USER") {
            self.proxy.user = Some(val);
        }
        if let Some(val) = var("PROXY_PASS") {
            self.proxy.pass = Some(val);
        }

        // Logging
        if let Some(val) = var("AMSCAN_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("AMSCAN_LOG_FORMAT") {
            self.logging.format = val;
        }

        self
    }
}

/// How the credential is presented to the scanner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    #[default]
    ApiKey,
    Bearer,
}

/// Scanner service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Region the API key was issued in (e.g. us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Explicit scanner host[:port]; overrides the region when set
    pub host: Option<String>,

    /// API key or bearer token
    pub api_key: Option<String>,

    #[serde(default)]
    pub token_type: TokenType,

    /// Application name reported to the scanner
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Whole-scan timeout in seconds (0 = default)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Enable TLS
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Path to a PEM CA bundle used instead of the system roots
    pub ca_cert_path: Option<String>,
}

fn default_region() -> String {
    String::from("us-east-1")
}

fn default_app_name() -> String {
    String::from("V1FS")
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_true() -> bool {
    true
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            host: None,
            api_key: None,
            token_type: TokenType::ApiKey,
            app_name: default_app_name(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            use_tls: true,
            ca_cert_path: None,
        }
    }
}

impl ServiceConfig {
    /// Effective timeout in seconds; zero maps to the default
    pub fn effective_timeout(&self) -> u64 {
        if self.timeout_seconds == 0 {
            DEFAULT_TIMEOUT_SECONDS
        } else {
            self.timeout_seconds
        }
    }
}

/// Outbound proxy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    /// Comma-separated hosts that bypass the proxy
    pub no_proxy: Option<String>,
    pub user: Option<String>,
    pub pass: Option<String>,
}

/// Per-scan defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub pml: bool,

    #[serde(default)]
    pub feedback: bool,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub active_content: bool,

    /// Compute SHA-1/SHA-256 of local content before scanning
    #[serde(default = "default_true")]
    pub digest: bool,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Maximum concurrent scans when scanning a directory
    #[serde(default = "default_max_scans")]
    pub max_concurrent_scans: usize,
}

fn default_max_scans() -> usize {
    5
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pml: false,
            feedback: false,
            verbose: false,
            active_content: false,
            digest: true,
            tags: vec![],
            max_concurrent_scans: 5,
        }
    }
}

impl ScanConfig {
    /// Scan options carried by this section
    pub fn options(&self) -> ScanOptions {
        ScanOptions::builder()
            .pml(self.pml)
            .feedback(self.feedback)
            .verbose(self.verbose)
            .active_content(self.active_content)
            .tags(self.tags.iter().cloned())
            .build()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("compact")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.service.region = region.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.service.host = Some(host.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.service.api_key = Some(key.into());
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.service.api_key = Some(token.into());
        self.config.service.token_type = TokenType::Bearer;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.service.timeout_seconds = seconds;
        self
    }

    pub fn use_tls(mut self, enabled: bool) -> Self {
        self.config.service.use_tls = enabled;
        self
    }

    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.config.service.ca_cert_path = Some(path.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.config.scan.tags.push(tag.into());
        self
    }

    pub fn max_concurrent_scans(mut self, n: usize) -> Self {
        self.config.scan.max_concurrent_scans = n;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.service.region, "us-east-1");
        assert_eq!(config.service.app_name, "V1FS");
        assert_eq!(config.service.timeout_seconds, 300);
        assert!(config.service.use_tls);
        assert!(config.scan.digest);
        assert_eq!(config.scan.max_concurrent_scans, 5);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [service]
            region = "eu-central-1"
            api_key = "secret-key"
            token_type = "bearer"
            timeout_seconds = 60

            [proxy]
            https_proxy = "http://proxy.local:3128"
            no_proxy = "localhost,*.internal"

            [scan]
            pml = true
            tags = ["prod", "upload"]
            max_concurrent_scans = 10

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.service.region, "eu-central-1");
        assert_eq!(config.service.api_key, Some(String::from("secret-key")));
        assert_eq!(config.service.token_type, TokenType::Bearer);
        assert_eq!(config.service.timeout_seconds, 60);
        assert_eq!(config.service.app_name, "V1FS");
        assert_eq!(
            config.proxy.https_proxy.as_deref(),
            Some("http://proxy.local:3128")
        );
        assert_eq!(config.scan.max_concurrent_scans, 10);
        assert!(config.scan.digest);
        assert_eq!(config.logging.level, "debug");

        let options = config.scan.options();
        assert!(options.pml());
        assert_eq!(options.tags().len(), 2);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("[service\nregion=").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_merge_vars() {
        let vars: HashMap<&str, &str> = [
            ("AMSCAN_REGION", "ap-south-1"),
            ("AMSCAN_API_KEY", "from-env"),
            ("AMSCAN_TIMEOUT", "not-a-number"),
            ("https_proxy", "socks5://lower:1080"),
            ("HTTPS_PROXY", "socks5://upper:1080"),
            ("no_proxy", "example.com"),
            ("PROXY_USER", "alice"),
            ("AMSCAN_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().merge_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.service.region, "ap-south-1");
        assert_eq!(config.service.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.service.timeout_seconds, 300);
        assert_eq!(config.proxy.https_proxy.as_deref(), Some("socks5://upper:1080"));
        assert_eq!(config.proxy.no_proxy.as_deref(), Some("example.com"));
        assert_eq!(config.proxy.user.as_deref(), Some("alice"));
        assert!(config.proxy.pass.is_none());
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        let config = Config::builder().timeout_seconds(0).build();
        assert_eq!(config.service.effective_timeout(), 300);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .host("scanner.internal:50051")
            .bearer_token("tok")
            .use_tls(false)
            .tag("nightly")
            .log_level("warn")
            .build();

        assert_eq!(config.service.host.as_deref(), Some("scanner.internal:50051"));
        assert_eq!(config.service.token_type, TokenType::Bearer);
        assert!(!config.service.use_tls);
        assert_eq!(config.scan.tags, vec!["nightly".to_string()]);
        assert_eq!(config.logging.level, "warn");
    }
}
