//! Error types for the amscan SDK

use std::time::Duration;
use thiserror::Error;

/// Result type alias using amscan Error
pub type Result<T> = std::result::Result<T, Error>;

/// amscan error types
///
/// Every failure of a scan call surfaces as exactly one of these. Local
/// validation errors are raised before any network I/O.
#[derive(Error, Debug)]
pub enum Error {
    // === Content Source Errors ===
    #[error("Failed to open file. No such file or directory {path}.")]
    FileNotFound { path: String },

    #[error("Failed to open file. Permission denied to open {path}.")]
    NoPermission { path: String },

    #[error("Content of {length} bytes exceeds the maximum scannable size of {limit} bytes")]
    ContentTooLarge { length: u64, limit: u64 },

    // === Client Configuration Errors ===
    #[error("{region} is not a supported region, region value should be one of {supported}")]
    InvalidRegion { region: String, supported: String },

    #[error("Must provide an API key to use the client.")]
    MissingAuth,

    #[error("Failed to load SSL certificate: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Scan Option Errors ===
    #[error("Exceeded maximum number of tags: {max}")]
    TooManyTags { max: usize },

    #[error("Tag length must be between 1 and {max}: {tag}.")]
    TagTooLong { max: usize, tag: String },

    // === Session Errors ===
    #[error("Authorization key cannot be authenticated.")]
    AuthFailed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Scan deadline exceeded after {}ms waiting for the stream", elapsed.as_millis())]
    DeadlineExceeded { elapsed: Duration },

    #[error("Received gRPC status code: {code}, msg: {description}.")]
    Transport { code: i32, description: String },

    #[error("Scan cancelled: client is shutting down")]
    Cancelled,

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic ===
    #[error("Unexpected error encountered: {0}")]
    Unexpected(String),
}

impl Error {
    /// Check if this error is worth retrying by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::DeadlineExceeded { .. }
        )
    }

    /// Check if this error was raised locally before any network activity
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::FileNotFound { .. }
                | Error::NoPermission { .. }
                | Error::ContentTooLarge { .. }
                | Error::InvalidRegion { .. }
                | Error::MissingAuth
                | Error::Tls(_)
                | Error::Configuration(_)
                | Error::TooManyTags { .. }
                | Error::TagTooLong { .. }
        )
    }

    /// Get an error code for logging/metrics
    pub fn code(&self) -> &'static str {
        match self {
            Error::FileNotFound { .. } => "FILE_NOT_FOUND",
            Error::NoPermission { .. } => "FILE_NO_PERMISSION",
            Error::ContentTooLarge { .. } => "CONTENT_TOO_LARGE",
            Error::InvalidRegion { .. } => "INVALID_REGION",
            Error::MissingAuth => "MISSING_AUTH",
            Error::Tls(_) => "LOAD_SSL_CERT",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::TooManyTags { .. } => "MAX_NUMBER_OF_TAGS",
            Error::TagTooLong { .. } => "LENGTH_OF_TAG",
            Error::AuthFailed => "KEY_AUTH_FAILED",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Error::Transport { .. } => "GRPC_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Unexpected(_) => "UNEXPECTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_message_keeps_status() {
        let err = Error::Transport {
            code: 2,
            description: "UNKNOWN".into(),
        };
        assert_eq!(err.to_string(), "Received gRPC status code: 2, msg: UNKNOWN.");
        assert_eq!(err.code(), "GRPC_ERROR");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_local_errors_are_not_retryable() {
        let err = Error::TagTooLong {
            max: 63,
            tag: "x".repeat(64),
        };
        assert!(err.is_local());
        assert!(!err.is_retryable());
        assert!(!Error::AuthFailed.is_local());
    }
}
