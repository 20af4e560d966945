//! Crawler module for scan execution
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with error classification and retry policy
//! - The deduplicating, budgeted frontier
//! - Per-host rate limiting
//! - Link, form and fingerprint extraction
//! - Scan orchestration

mod context;
mod extractor;
mod fetcher;
mod frontier;
mod limiter;
mod orchestrator;

pub use context::ScanContext;
pub use extractor::{extract, Extraction, FormDescriptor, FormField};
pub use fetcher::{
    build_http_client, FetchError, FetchErrorKind, FetchedPage, Fetcher, RetryPolicy,
};
pub use frontier::{EntryStatus, Frontier, FrontierEntry};
pub use limiter::{LimiterPolicy, PermitOutcome, RateBudget, RateLimiter, RatePermit};
pub use orchestrator::{Orchestrator, ScanReport};
