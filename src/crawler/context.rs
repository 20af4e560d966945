//! Process-wide crawl state shared by concurrent scans

use crate::config::{Config, EngineConfig};
use crate::crawler::limiter::{LimiterPolicy, RateLimiter};
use crate::crawler::RetryPolicy;
use crate::fingerprint::SignatureTable;
use crate::robots::{PolitenessCache, PolitenessPolicy};
use crate::ScanError;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Per-host caches and engine settings
///
/// Several scans against the same host share one robots.txt entry and one
/// rate bucket, so one `ScanContext` should back every scan in the process.
pub struct ScanContext {
    engine: EngineConfig,
    retry: RetryPolicy,
    politeness: PolitenessCache,
    limiter: RateLimiter,
    signatures: Arc<SignatureTable>,
}

impl ScanContext {
    /// Creates a context whose cache policies come from `engine`
    pub fn new(
        engine: EngineConfig,
        retry: RetryPolicy,
        signatures: SignatureTable,
    ) -> Result<Self, ScanError> {
        let politeness = PolitenessPolicy::from_engine(&engine);
        let limiter = LimiterPolicy::from_engine(&engine);
        Self::with_policies(engine, retry, signatures, politeness, limiter)
    }

    /// Creates a context with explicit cache policies
    pub fn with_policies(
        engine: EngineConfig,
        retry: RetryPolicy,
        signatures: SignatureTable,
        politeness: PolitenessPolicy,
        limiter: LimiterPolicy,
    ) -> Result<Self, ScanError> {
        Ok(Self {
            engine,
            retry,
            politeness: PolitenessCache::new(politeness)?,
            limiter: RateLimiter::new(limiter),
            signatures: Arc::new(signatures),
        })
    }

    /// Builds the context described by a loaded configuration
    ///
    /// Uses the signature file named in `[fingerprints]` when present, the
    /// built-in table otherwise.
    pub fn from_config(config: &Config) -> Result<Self, ScanError> {
        let signatures = match &config.fingerprints.signatures_path {
            Some(path) => {
                info!("Loading technology signatures from {}", path);
                SignatureTable::load(Path::new(path))?
            }
            None => SignatureTable::builtin()?,
        };

        Self::new(
            config.engine.clone(),
            RetryPolicy::from(&config.retry),
            signatures,
        )
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn politeness(&self) -> &PolitenessCache {
        &self.politeness
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn signatures(&self) -> &Arc<SignatureTable> {
        &self.signatures
    }
}
