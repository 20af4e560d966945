//! Sumi-Probe: scan orchestration and crawling engine
//!
//! This crate explores the reachable surface of a scan target while respecting
//! robots.txt and per-host rate limits, extracts pages, forms and technology
//! fingerprints, and drives each scan job through its lifecycle.

pub mod config;
pub mod crawler;
pub mod fingerprint;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Probe operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Seed URL {url} could not be fetched: {source}")]
    SeedUnreachable {
        url: String,
        source: crawler::FetchError,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: state::ScanStatus,
        to: state::ScanStatus,
    },

    #[error("Signature table error: {0}")]
    Signatures(String),

    #[error("Scan {0} was cancelled")]
    Cancelled(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Probe operations
pub type Result<T> = std::result::Result<T, ScanError>;

// Re-export commonly used types
pub use config::{Config, ScanConfiguration};
pub use crawler::{Orchestrator, ScanContext, ScanReport};
pub use state::{PageOutcome, ScanStatus};
pub use url::{normalize_url, LinkScope};
