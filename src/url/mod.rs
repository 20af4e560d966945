//! URL handling module for Sumi-Probe
//!
//! This module provides URL normalization (the frontier's deduplication key),
//! per-host keys for shared caches, and link scope filtering.

mod domain;
mod normalize;
mod scope;

// Re-export main functions
pub use domain::host_key;
pub use normalize::{normalize_parsed, normalize_url};
pub use scope::{LinkScope, ScopeFilter};
