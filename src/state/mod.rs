//! State module for tracking scan progress
//!
//! # Components
//!
//! - `ScanStatus` / `ScanLifecycle`: the scan job state machine
//! - `PageOutcome`: how the fetch of each discovered URL ended

mod page_outcome;
mod scan_status;

// Re-export main types
pub use page_outcome::PageOutcome;
pub use scan_status::{ScanLifecycle, ScanStatus};
