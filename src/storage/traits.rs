//! Storage traits and error types
//!
//! This module defines the contract between the scan engine and the
//! persistence collaborator.

use crate::state::{PageOutcome, ScanStatus};
use crate::storage::{DiscoveredUrl, ExtractedForm, ScanJob, TechnologyFingerprint};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use url::Url;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Scan job not found: {0}")]
    JobNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence collaborator used by the scan engine
///
/// Implementations are shared between workers and must synchronize
/// internally. The `save_*` operations are idempotent appends: saving the
/// same record twice leaves a single row.
pub trait ScanStore: Send + Sync {
    // ===== Job Management =====

    /// Creates a job for `target` in the `queued` state
    fn create_job(&self, target: &Url) -> StorageResult<ScanJob>;

    /// Gets a job by ID
    fn get_job(&self, scan_id: i64) -> StorageResult<ScanJob>;

    /// Persists a status change decided by the engine's state machine
    fn update_job_status(
        &self,
        scan_id: i64,
        status: ScanStatus,
        updated_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    // ===== Artifacts =====

    /// Records a discovered URL; duplicates per (scan, url) are ignored
    fn save_discovered_url(&self, record: &DiscoveredUrl) -> StorageResult<()>;

    /// Records a form; duplicates per (scan, page, action, method) are ignored
    ///
    /// Returns `true` when a new row was written.
    fn save_extracted_form(&self, record: &ExtractedForm) -> StorageResult<bool>;

    /// Records a fingerprint; duplicates per (scan, name, version) are ignored
    fn save_fingerprint(&self, record: &TechnologyFingerprint) -> StorageResult<()>;

    // ===== Queries =====

    /// Lists discovered URLs of a scan ordered by depth then URL
    fn list_discovered_urls(&self, scan_id: i64) -> StorageResult<Vec<DiscoveredUrl>>;

    /// Lists forms of a scan
    fn list_forms(&self, scan_id: i64) -> StorageResult<Vec<ExtractedForm>>;

    /// Lists fingerprints of a scan
    fn list_fingerprints(&self, scan_id: i64) -> StorageResult<Vec<TechnologyFingerprint>>;

    // ===== Statistics =====

    /// Counts discovered URLs of a scan
    fn count_discovered_urls(&self, scan_id: i64) -> StorageResult<u64>;

    /// Counts discovered URLs of a scan per outcome (absent outcomes omitted)
    fn count_by_outcome(&self, scan_id: i64) -> StorageResult<HashMap<PageOutcome, u64>>;
}
