//! Scan result data model
//!
//! The scanner returns its verdict as a JSON document. These types mirror
//! that document field-for-field so callers can decode it; the scan calls
//! themselves hand back the raw JSON string.

use serde::{Deserialize, Serialize};

/// `scanResult` value for a clean object
pub const SCAN_RESULT_CLEAN: i32 = 0;

/// `scanResult` value when malware was found
pub const SCAN_RESULT_MALICIOUS: i32 = 1;

/// Standard scan result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub version: String,
    pub scan_result: i32,
    pub scan_id: String,
    pub scan_timestamp: String,
    pub file_name: String,
    #[serde(default)]
    pub found_malwares: Vec<MalwareItem>,
}

/// A single detection in a [`ScanResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MalwareItem {
    pub malware_name: String,
    pub file_name: String,
}

impl ScanResult {
    /// Decode a result JSON document
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode back to JSON
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// True if the scanner reported malware
    pub fn is_malicious(&self) -> bool {
        self.scan_result == SCAN_RESULT_MALICIOUS || !self.found_malwares.is_empty()
    }
}

impl MalwareItem {
    pub fn new(malware_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            malware_name: malware_name.into(),
            file_name: file_name.into(),
        }
    }
}

/// Verbose scan result, returned when the scan asked for `verbose`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerboseScanResult {
    pub scan_type: String,
    pub object_type: String,
    pub timestamp: Option<StartEnd>,
    pub schema_version: String,
    pub scanner_version: String,
    pub file_name: String,
    pub rs_size: u64,
    pub scan_id: String,
    pub account_id: String,
    pub result: Option<EngineResults>,
    pub tags: Option<Vec<String>>,
    #[serde(rename = "fileSHA1")]
    pub file_sha1: String,
    #[serde(rename = "fileSHA256")]
    pub file_sha256: String,
    pub app_name: String,
}

impl VerboseScanResult {
    /// Decode a verbose result JSON document
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Total detections across both engines
    pub fn malware_count(&self) -> u32 {
        self.result
            .as_ref()
            .map(|r| {
                r.atse.as_ref().map_or(0, |e| e.malware_count)
                    + r.trendx.as_ref().map_or(0, |e| e.malware_count)
            })
            .unwrap_or(0)
    }
}

/// Scan start/end timestamps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartEnd {
    pub start: String,
    pub end: String,
}

/// Per-engine results: pattern engine and machine learning engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineResults {
    pub atse: Option<EngineResult>,
    pub trendx: Option<EngineResult>,
}

/// Result of one detection engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineResult {
    pub elapsed_time: u64,
    pub file_type: i32,
    pub file_sub_type: i32,
    pub version: Option<EngineVersion>,
    pub malware_count: u32,
    pub malware: Option<Vec<Malware>>,
    pub error: Option<Vec<EngineError>>,
    pub grid: Option<bool>,
    pub file_type_name: String,
    pub file_sub_type_name: String,
}

/// Engine and pattern versions. Fields depend on the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineVersion {
    pub engine: String,
    pub lptvpn: Option<i64>,
    pub ssaptn: Option<i64>,
    pub tmblack: Option<i64>,
    pub tmwhite: Option<i64>,
    pub macvpn: Option<i64>,
    pub trendx: Option<i64>,
}

/// Detailed detection record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Malware {
    pub name: String,
    pub file_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub file_type: i32,
    pub file_sub_type: i32,
    pub file_type_name: String,
    pub file_sub_type_name: String,
}

/// Engine-reported error
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}
