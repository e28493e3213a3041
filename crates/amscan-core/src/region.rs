//! Service region resolution
//!
//! Callers name the region their API key was issued in using the cloud
//! provider's region code (e.g. `us-east-1`). Each supported code maps to a
//! service region, and each service region to the scanner's hostname.

use tracing::info;

use crate::{Error, Result};

/// Supported caller-facing region codes, in the order they are reported
pub const SUPPORTED_REGIONS: &[&str] = &[
    "ap-southeast-2",
    "eu-central-1",
    "ap-northeast-1",
    "ap-southeast-1",
    "us-east-1",
    "ap-south-1",
    "me-central-1",
];

/// Caller region code to service region
const SERVICE_REGIONS: &[(&str, &str)] = &[
    ("ap-southeast-2", "au-1"),
    ("eu-central-1", "de-1"),
    ("ap-northeast-1", "jp-1"),
    ("ap-southeast-1", "sg-1"),
    ("us-east-1", "us-1"),
    ("ap-south-1", "in-1"),
    ("me-central-1", "ae-1"),
];

/// Service region to scanner hostname
const SERVICE_HOSTS: &[(&str, &str)] = &[
    ("us-1", "antimalware.us-1.cloudone.trendmicro.com"),
    ("in-1", "antimalware.in-1.cloudone.trendmicro.com"),
    ("de-1", "antimalware.de-1.cloudone.trendmicro.com"),
    ("sg-1", "antimalware.sg-1.cloudone.trendmicro.com"),
    ("au-1", "antimalware.au-1.cloudone.trendmicro.com"),
    ("jp-1", "antimalware.jp-1.cloudone.trendmicro.com"),
    ("gb-1", "antimalware.gb-1.cloudone.trendmicro.com"),
    ("ca-1", "antimalware.ca-1.cloudone.trendmicro.com"),
    ("trend-us-1", "antimalware.trend-us-1.cloudone.trendmicro.com"),
    ("ae-1", "antimalware.ae-1.cloudone.trendmicro.com"),
];

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Comma-separated list of supported region codes
pub fn supported_regions() -> String {
    SUPPORTED_REGIONS.join(",")
}

/// Resolve a region code to the scanner hostname
pub fn service_host(region: &str) -> Result<&'static str> {
    let host = lookup(SERVICE_REGIONS, region).and_then(|r| lookup(SERVICE_HOSTS, r));

    host.ok_or_else(|| {
        info!("{} is not a supported region", region);
        Error::InvalidRegion {
            region: region.to_string(),
            supported: supported_regions(),
        }
    })
}

/// Pick the scan target: an explicit host wins, otherwise the region's host
pub fn resolve_target(region: &str, host: Option<&str>) -> Result<String> {
    match host {
        Some(h) if !h.trim().is_empty() => Ok(h.trim().to_string()),
        _ => service_host(region).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_regions() {
        assert_eq!(
            service_host("us-east-1").unwrap(),
            "antimalware.us-1.cloudone.trendmicro.com"
        );
        assert_eq!(
            service_host("ap-southeast-2").unwrap(),
            "antimalware.au-1.cloudone.trendmicro.com"
        );
        assert_eq!(
            service_host("me-central-1").unwrap(),
            "antimalware.ae-1.cloudone.trendmicro.com"
        );
    }

    #[test]
    fn test_every_supported_region_resolves() {
        for region in SUPPORTED_REGIONS {
            assert!(service_host(region).is_ok(), "{} should resolve", region);
        }
    }

    #[test]
    fn test_unknown_region_lists_supported() {
        let err = service_host("aa-1").unwrap_err();
        match &err {
            Error::InvalidRegion { region, supported } => {
                assert_eq!(region, "aa-1");
                assert_eq!(supported, &supported_regions());
            }
            other => panic!("unexpected error {:?}", other),
        }
        let msg = err.to_string();
        assert!(msg.starts_with("aa-1 is not a supported region"));
        for region in SUPPORTED_REGIONS {
            assert!(msg.contains(region));
        }
    }

    #[test]
    fn test_service_region_codes_are_not_caller_regions() {
        assert!(service_host("us-1").is_err());
    }

    #[test]
    fn test_explicit_host_overrides_region() {
        assert_eq!(
            resolve_target("bogus", Some("scanner.internal:50051")).unwrap(),
            "scanner.internal:50051"
        );
        assert!(resolve_target("bogus", Some("  ")).is_err());
    }
}
