//! amscan Common - Shared utilities: logging and configuration
//!
//! This crate provides common functionality used by the amscan client crates
//! and the scanner binary.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigBuilder, TokenType};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogFormat};
