//! Storage module for persisting scan results
//!
//! The engine talks to persistence only through the [`ScanStore`] trait. A
//! SQLite implementation is provided for the CLI and for tests.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{ScanStore, StorageError, StorageResult};

use crate::crawler::FormDescriptor;
use crate::fingerprint::TechSignal;
use crate::state::{PageOutcome, ScanStatus};
use chrono::{DateTime, Utc};
use url::Url;

/// A scan job as known to the persistence collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct ScanJob {
    pub id: i64,
    pub target: Url,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A URL observed during a scan
///
/// One row per unique normalized URL per scan.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredUrl {
    pub scan_id: i64,
    pub url: String,
    /// HTTP status, absent when no response was received
    pub status_code: Option<u16>,
    pub depth: u32,
    pub outcome: PageOutcome,
    pub error: Option<String>,
}

/// An HTML form found on a page
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedForm {
    pub scan_id: i64,
    pub page_url: String,
    pub form: FormDescriptor,
}

/// A technology detected during a scan
#[derive(Debug, Clone, PartialEq)]
pub struct TechnologyFingerprint {
    pub scan_id: i64,
    pub source_url: String,
    pub signal: TechSignal,
}
