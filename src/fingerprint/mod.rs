//! Technology fingerprinting
//!
//! Fingerprints are driven by a data table of regex signatures. A built-in
//! table ships inside the binary; a TOML file can replace it at runtime.

mod signatures;

pub use signatures::{SignatureSource, SignatureTable};

use serde::{Deserialize, Serialize};

/// A technology detected on a page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TechSignal {
    /// Technology name, e.g. `nginx` or `WordPress`
    pub name: String,
    /// Version string when the signature captures one
    pub version: Option<String>,
}

impl TechSignal {
    pub fn new(name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for TechSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}
