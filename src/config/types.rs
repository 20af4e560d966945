use crate::url::LinkScope;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Probe
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scan: ScanConfiguration,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub fingerprints: FingerprintConfig,
}

/// Immutable per-scan parameters
///
/// Supplied when a scan is created and read-only for the lifetime of the scan.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfiguration {
    /// Maximum link depth from the seed URL (the seed is depth 0)
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Maximum number of URLs accepted into the frontier, seed included
    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    /// Ceiling on requests per second to any single host
    #[serde(rename = "requests-per-second")]
    pub requests_per_second: f64,

    /// Per-request timeout in seconds
    pub timeout: f64,

    /// Whether HTTP redirects are followed
    #[serde(rename = "follow-redirects", default = "default_true")]
    pub follow_redirects: bool,

    /// Whether robots.txt directives are honored
    #[serde(rename = "respect-robots", default = "default_true")]
    pub respect_robots: bool,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl ScanConfiguration {
    /// Returns the per-request timeout as a duration
    ///
    /// Values outside what validation accepts are clamped to `MAX_TIMEOUT`.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or(MAX_TIMEOUT)
            .min(MAX_TIMEOUT)
    }
}

/// Longest per-request timeout accepted
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Slowest request rate accepted (one request every 100 seconds)
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.01;

/// Fastest request rate accepted
pub const MAX_REQUESTS_PER_SECOND: f64 = 1000.0;

/// Engine-wide behavior shared by every scan the process runs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent workers per scan
    pub workers: u32,

    /// Response bodies larger than this are truncated
    #[serde(rename = "max-body-bytes")]
    pub max_body_bytes: usize,

    /// Maximum redirect hops followed when redirects are enabled
    #[serde(rename = "max-redirects")]
    pub max_redirects: usize,

    /// Which discovered links belong to the scan target
    #[serde(rename = "link-scope")]
    pub link_scope: LinkScope,

    /// What to assume when a robots.txt cannot be fetched
    #[serde(rename = "robots-failure")]
    pub robots_failure: RobotsFailurePolicy,

    /// Lifetime of a cached robots.txt entry (seconds)
    #[serde(rename = "robots-ttl")]
    pub robots_ttl: u64,

    /// Timeout for fetching robots.txt (seconds)
    #[serde(rename = "robots-timeout")]
    pub robots_timeout: u64,

    /// Per-host rate buckets idle longer than this are evicted (seconds)
    #[serde(rename = "idle-eviction")]
    pub idle_eviction: u64,

    /// Grace period for in-flight fetches after cancellation (seconds)
    #[serde(rename = "cancel-grace")]
    pub cancel_grace: u64,

    /// Pause applied to a host after it answers 429 or 503 (seconds)
    #[serde(rename = "throttle-penalty")]
    pub throttle_penalty: u64,

    /// Largest robots.txt Crawl-delay honored (seconds)
    #[serde(rename = "max-crawl-delay")]
    pub max_crawl_delay: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_body_bytes: 2 * 1024 * 1024,
            max_redirects: 10,
            link_scope: LinkScope::Origin,
            robots_failure: RobotsFailurePolicy::Allow,
            robots_ttl: 3600,
            robots_timeout: 5,
            idle_eviction: 600,
            cancel_grace: 5,
            throttle_penalty: 5,
            max_crawl_delay: 30,
        }
    }
}

/// Behavior when a host's robots.txt cannot be retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotsFailurePolicy {
    /// Fail open: everything allowed, no extra delay
    Allow,
    /// Fail closed: nothing on the host is fetched
    Deny,
}

/// Retry policy for transient per-request failures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of retries after the first attempt
    pub attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-delay")]
    pub base_delay: u64,

    /// Factor applied to the delay after every retry
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            base_delay: 500,
            multiplier: 2.0,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Fingerprint signature source
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FingerprintConfig {
    /// Optional TOML signature table replacing the built-in one
    #[serde(rename = "signatures-path")]
    pub signatures_path: Option<String>,
}

fn default_true() -> bool {
    true
}
