//! Output module for scan summaries
//!
//! This module prints the report of a scan that just ran and the stored
//! statistics of past scans.

pub mod stats;

pub use stats::{load_statistics, print_report, print_statistics, ScanStatistics};
