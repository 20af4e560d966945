//! Configuration module for Sumi-Probe
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_probe::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("probe.toml")).unwrap();
//! println!("Scan will use max depth: {}", config.scan.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, EngineConfig, FingerprintConfig, OutputConfig, RetryConfig, RobotsFailurePolicy,
    ScanConfiguration, MAX_REQUESTS_PER_SECOND, MAX_TIMEOUT, MIN_REQUESTS_PER_SECOND,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate_scan_configuration;
