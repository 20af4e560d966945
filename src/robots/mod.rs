//! Robots.txt handling module
//!
//! This module fetches, parses and caches robots.txt per host. It answers
//! whether a URL may be fetched and how far apart requests to a host must be.

mod cache;
mod parser;

pub use cache::{CachedRobots, PolitenessCache, PolitenessPolicy};
pub use parser::{product_token, RobotsRules};
