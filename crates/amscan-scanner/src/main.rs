//! amscan - anti-malware scanning client
//!
//! Scans a file, every file under a directory, or a remote object and prints
//! one JSON line per verdict.

mod targets;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use amscan_cloud::RemoteObjectSource;
use amscan_common::{Config, LogConfig};
use amscan_core::{ScanOptions, ScanResult};
use amscan_transport::{ClientConfig, ScanClient};
use anyhow::Result;
use clap::Parser;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::targets::Target;

/// amscan scanner
#[derive(Parser, Debug)]
#[command(name = "amscan")]
#[command(version)]
#[command(about = "Submit files and objects to the anti-malware scanning service", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/amscan/amscan.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Service region (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// Scanner host[:port] (overrides region)
    #[arg(long)]
    host: Option<String>,

    /// API key
    #[arg(long, env = "AMSCAN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Whole-scan timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Tag attached to every scan (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Enable predictive machine learning detection
    #[arg(long)]
    pml: bool,

    /// Enable smart feedback
    #[arg(long)]
    feedback: bool,

    /// Request the verbose result format
    #[arg(long)]
    verbose: bool,

    /// Report active content (scripts, macros)
    #[arg(long)]
    active_content: bool,

    /// Do not compute or send content digests
    #[arg(long)]
    no_digest: bool,

    /// Connect without TLS (local scanners)
    #[arg(long)]
    no_tls: bool,

    /// Maximum scans in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// File, directory, s3://bucket/key or pre-signed https:// URL
    target: String,
}

impl Args {
    /// Apply command-line overrides on top of file and environment config
    fn apply(&self, mut config: Config) -> Config {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
        if let Some(region) = &self.region {
            config.service.region = region.clone();
        }
        if let Some(host) = &self.host {
            config.service.host = Some(host.clone());
        }
        if let Some(key) = &self.api_key {
            config.service.api_key = Some(key.clone());
        }
        if let Some(timeout) = self.timeout {
            config.service.timeout_seconds = timeout;
        }
        if self.no_tls {
            config.service.use_tls = false;
        }

        let scan = &mut config.scan;
        scan.tags.extend(self.tags.iter().cloned());
        scan.pml |= self.pml;
        scan.feedback |= self.feedback;
        scan.verbose |= self.verbose;
        scan.active_content |= self.active_content;
        if self.no_digest {
            scan.digest = false;
        }
        if let Some(n) = self.concurrency {
            scan.max_concurrent_scans = n;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_found = Path::new(&args.config).exists();
    let config = if config_found {
        Config::from_file(&args.config)?
    } else {
        Config::default()
    };
    let config = args.apply(config.merge_env());

    amscan_common::init_logging_with_config(LogConfig::from_section(&config.logging)?)?;

    info!("amscan {} starting", env!("CARGO_PKG_VERSION"));
    if !config_found {
        info!("Config file {} not found, using defaults", args.config);
    }

    let options = config.scan.options();
    options.validate()?;
    let digest = config.scan.digest;
    let concurrency = config.scan.max_concurrent_scans.max(1);

    let targets = targets::expand(&args.target).await?;
    if targets.is_empty() {
        warn!("Nothing to scan under {}", args.target);
        return Ok(());
    }

    let client = Arc::new(ScanClient::connect(ClientConfig::from_config(&config)).await?);
    info!(
        "Scanning {} object(s), up to {} at a time, timeout {:?}",
        targets.len(),
        concurrency,
        client.timeout()
    );

    let total = targets.len();
    let failed = tokio::select! {
        failed = scan_all(client.clone(), targets, options, digest, concurrency) => failed,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling in-flight scans");
            client.close().await;
            anyhow::bail!("scan interrupted");
        }
    };

    client.close().await;

    if failed > 0 {
        anyhow::bail!("{} of {} scans failed", failed, total);
    }
    Ok(())
}

/// Scan every target with at most `concurrency` in flight. Returns the failure count.
async fn scan_all(
    client: Arc<ScanClient>,
    targets: Vec<Target>,
    options: ScanOptions,
    digest: bool,
    concurrency: usize,
) -> usize {
    let permits = Arc::new(Semaphore::new(concurrency));
    let options = Arc::new(options);
    let mut tasks = JoinSet::new();

    for target in targets {
        let permits = permits.clone();
        let client = client.clone();
        let options = options.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(scan_one(&client, &target, &options, digest).await)
        });
    }

    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(true)) => {}
            Ok(_) => failed += 1,
            Err(e) => {
                error!("Scan task panicked: {}", e);
                failed += 1;
            }
        }
    }
    failed
}

/// Scan one target, print its result line, and report success
async fn scan_one(client: &ScanClient, target: &Target, options: &ScanOptions, digest: bool) -> bool {
    let name = target.display_name();
    let started = Instant::now();

    let outcome = match target {
        Target::File(path) => client.scan_file(path, digest, options).await,
        Target::Remote(location) => match RemoteObjectSource::open(location, digest, None).await {
            Ok(source) => client.scan_run(Arc::new(source), options).await,
            Err(e) => Err(e),
        },
    };

    match outcome {
        Ok(json) => {
            if let Ok(result) = ScanResult::from_json(&json) {
                if result.is_malicious() {
                    warn!("Malware found in {}", name);
                }
            }
            match result_line(&name, &json, started.elapsed()) {
                Ok(line) => println!("{}", line),
                Err(e) => {
                    warn!("Result for {} is not valid JSON: {}", name, e);
                    println!("{}", json);
                }
            }
            true
        }
        Err(e) => {
            error!(code = e.code(), "Scan of {} failed: {}", name, e);
            false
        }
    }
}

/// One output line: the target, elapsed time, and the scanner's result document
fn result_line(target: &str, json: &str, elapsed: Duration) -> serde_json::Result<String> {
    let result: serde_json::Value = serde_json::from_str(json)?;
    serde_json::to_string(&serde_json::json!({
        "target": target,
        "elapsedMs": elapsed.as_millis() as u64,
        "result": result,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "amscan",
            "--region",
            "eu-central-1",
            "--tag",
            "a",
            "--tag",
            "b",
            "--pml",
            "--no-digest",
            "--timeout",
            "0",
            "--concurrency",
            "2",
            "/tmp/file",
        ]);
        let config = args.apply(Config::builder().tag("base").build());

        assert_eq!(config.service.region, "eu-central-1");
        assert_eq!(config.service.effective_timeout(), 300);
        assert_eq!(config.scan.tags, vec!["base", "a", "b"]);
        assert!(config.scan.pml);
        assert!(!config.scan.feedback);
        assert!(!config.scan.digest);
        assert_eq!(config.scan.max_concurrent_scans, 2);
        assert_eq!(args.target, "/tmp/file");
    }

    #[test]
    fn test_defaults_keep_config() {
        let args = Args::parse_from(["amscan", "s3://bucket/key"]);
        let config = args.apply(Config::default());
        assert_eq!(config.service.region, "us-east-1");
        assert!(config.service.use_tls);
        assert!(config.scan.digest);
        assert_eq!(config.scan.max_concurrent_scans, 5);
    }

    #[test]
    fn test_result_line() {
        let json = r#"{"version":"1.0.0","scanResult":0,"scanId":"id","scanTimestamp":"t","fileName":"f","foundMalwares":[]}"#;
        let line = result_line("f", json, Duration::from_millis(42)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["target"], "f");
        assert_eq!(value["elapsedMs"], 42);
        assert_eq!(value["result"]["scanId"], "id");

        assert!(result_line("f", "not json", Duration::ZERO).is_err());
    }
}
