//! Robots.txt rule evaluation
//!
//! Allow/Disallow matching is delegated to the robotstxt crate. Crawl-delay is
//! not part of that matcher, so groups are parsed here to find it.

use robotstxt::DefaultMatcher;
use std::time::Duration;
use url::Url;

/// Crawl directives for one host
#[derive(Debug, Clone)]
pub struct RobotsRules {
    verdict: Verdict,
    groups: Vec<RobotsGroup>,
}

#[derive(Debug, Clone)]
enum Verdict {
    AllowAll,
    DenyAll,
    Rules(String),
}

/// One `User-agent` group with the directives the matcher does not cover
#[derive(Debug, Clone, Default, PartialEq)]
struct RobotsGroup {
    agents: Vec<String>,
    crawl_delay: Option<f64>,
}

impl RobotsRules {
    /// Parses a robots.txt body
    pub fn parse(body: &str) -> Self {
        if body.trim().is_empty() {
            return Self::allow_all();
        }

        Self {
            verdict: Verdict::Rules(body.to_string()),
            groups: parse_groups(body),
        }
    }

    /// Rules for a host without a robots.txt
    pub fn allow_all() -> Self {
        Self {
            verdict: Verdict::AllowAll,
            groups: Vec::new(),
        }
    }

    /// Rules for a host whose robots.txt could not be retrieved under a
    /// fail-closed policy
    pub fn deny_all() -> Self {
        Self {
            verdict: Verdict::DenyAll,
            groups: Vec::new(),
        }
    }

    /// Checks whether `url` may be fetched by `agent`
    ///
    /// `agent` is the product token of the user agent (e.g. `SumiProbe`).
    pub fn is_allowed(&self, url: &Url, agent: &str) -> bool {
        match &self.verdict {
            Verdict::AllowAll => true,
            Verdict::DenyAll => false,
            Verdict::Rules(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, agent, url.as_str())
            }
        }
    }

    /// Returns the crawl delay that applies to `agent`
    ///
    /// Groups naming the agent take precedence over `*`. A matching group
    /// without a Crawl-delay means no delay, even if `*` declares one. A value
    /// too large for a `Duration` saturates; callers clamp it.
    pub fn crawl_delay(&self, agent: &str) -> Option<Duration> {
        let specific: Vec<&RobotsGroup> = self
            .groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| a.eq_ignore_ascii_case(agent)))
            .collect();

        let applicable = if specific.is_empty() {
            self.groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .collect()
        } else {
            specific
        };

        applicable
            .iter()
            .find_map(|g| g.crawl_delay)
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }
}

fn parse_groups(body: &str) -> Vec<RobotsGroup> {
    let mut groups = Vec::new();
    let mut current = RobotsGroup::default();
    // Consecutive User-agent lines share a group; the first rule closes the
    // agent list.
    let mut in_rules = false;

    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if in_rules {
                    groups.push(std::mem::take(&mut current));
                    in_rules = false;
                }
                current.agents.push(product_token(value).to_string());
            }
            "crawl-delay" => {
                in_rules = true;
                if current.crawl_delay.is_none() {
                    current.crawl_delay = value
                        .parse::<f64>()
                        .ok()
                        .filter(|d| d.is_finite() && *d >= 0.0);
                }
            }
            _ => in_rules = true,
        }
    }

    if !current.agents.is_empty() {
        groups.push(current);
    }

    groups
}

/// Leading product token of a user agent, e.g. `SumiProbe` for
/// `SumiProbe/1.0 (+https://example.com)`
///
/// Robots.txt groups are matched against this token.
pub fn product_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
}
