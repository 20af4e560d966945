//! Link scope filtering
//!
//! Decides whether a discovered link belongs to the scan target. Two rules are
//! available because "same site" is ambiguous: a strict origin match, or a
//! site match that also admits sibling subdomains.

use serde::Deserialize;
use std::net::IpAddr;
use url::Url;

/// Rule deciding which discovered links belong to the scan target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkScope {
    /// Same scheme, host and port as the seed URL
    #[default]
    Origin,
    /// The seed host (without a leading `www.`) or any of its subdomains,
    /// over http or https on any port
    Site,
}

/// A link scope bound to a specific scan target
#[derive(Debug, Clone)]
pub struct ScopeFilter {
    scope: LinkScope,
    target: Url,
    site: String,
}

impl ScopeFilter {
    /// Creates a filter for the given target URL
    pub fn new(scope: LinkScope, target: &Url) -> Self {
        let host = target.host_str().unwrap_or("").to_lowercase();
        let site = host.strip_prefix("www.").unwrap_or(&host).to_string();

        Self {
            scope,
            target: target.clone(),
            site,
        }
    }

    /// Returns the configured scope rule
    pub fn scope(&self) -> LinkScope {
        self.scope
    }

    /// Checks whether `candidate` is inside the scan's scope
    pub fn contains(&self, candidate: &Url) -> bool {
        match self.scope {
            LinkScope::Origin => candidate.origin() == self.target.origin(),
            LinkScope::Site => {
                if candidate.scheme() != "http" && candidate.scheme() != "https" {
                    return false;
                }
                let Some(host) = candidate.host_str() else {
                    return false;
                };
                let host = host.to_lowercase();

                // IP literals have no subdomains
                if self.site.parse::<IpAddr>().is_ok() || self.site.starts_with('[') {
                    return host == self.site;
                }

                host == self.site || host.ends_with(&format!(".{}", self.site))
            }
        }
    }
}
