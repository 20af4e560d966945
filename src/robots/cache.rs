//! Per-host politeness cache
//!
//! Robots.txt is fetched lazily the first time a host is referenced and kept
//! until it is older than the configured TTL. Concurrent lookups for a host
//! that is not cached yet share a single fetch.

use crate::config::{EngineConfig, RobotsFailurePolicy};
use crate::robots::{product_token, RobotsRules};
use crate::url::host_key;
use chrono::{DateTime, Utc};
use reqwest::header::USER_AGENT;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

/// Tunables for the politeness cache
#[derive(Debug, Clone)]
pub struct PolitenessPolicy {
    /// How long a fetched robots.txt stays valid
    pub ttl: Duration,
    /// Bound on the whole robots.txt exchange
    pub fetch_timeout: Duration,
    /// What to assume when robots.txt cannot be retrieved
    pub failure: RobotsFailurePolicy,
    /// Upper bound on a host's Crawl-delay
    pub max_crawl_delay: Duration,
    /// Bytes of robots.txt read; the rest is ignored
    pub max_body_bytes: usize,
}

impl PolitenessPolicy {
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            ttl: Duration::from_secs(engine.robots_ttl),
            fetch_timeout: Duration::from_secs(engine.robots_timeout),
            failure: engine.robots_failure,
            max_crawl_delay: Duration::from_secs(engine.max_crawl_delay),
            max_body_bytes: engine.max_body_bytes,
        }
    }
}

impl Default for PolitenessPolicy {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

/// Robots rules for a host along with when they were fetched
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub rules: Arc<RobotsRules>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(rules: RobotsRules) -> Self {
        Self {
            rules: Arc::new(rules),
            fetched_at: Utc::now(),
        }
    }

    /// Returns how long ago the rules were fetched
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.fetched_at
    }

    /// Checks if the entry is older than `ttl`
    pub fn is_stale(&self, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => self.age() > ttl,
            Err(_) => false,
        }
    }
}

type Slot = Arc<OnceCell<CachedRobots>>;

/// Caches robots.txt rules per host (scheme, host, port)
pub struct PolitenessCache {
    client: Client,
    policy: PolitenessPolicy,
    slots: Mutex<HashMap<String, Slot>>,
}

impl PolitenessCache {
    /// Creates an empty cache with its own HTTP client
    pub fn new(policy: PolitenessPolicy) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(Policy::limited(5))
            .timeout(policy.fetch_timeout)
            .build()?;

        Ok(Self {
            client,
            policy,
            slots: Mutex::new(HashMap::new()),
        })
    }

    pub fn policy(&self) -> &PolitenessPolicy {
        &self.policy
    }

    /// Checks whether `url` may be fetched with `user_agent`
    pub async fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        let rules = self.rules_for(url, user_agent).await;
        rules.is_allowed(url, product_token(user_agent))
    }

    /// Returns the minimum spacing the host asks for, zero if none
    ///
    /// Capped at the policy's `max_crawl_delay`.
    pub async fn crawl_delay(&self, url: &Url, user_agent: &str) -> Duration {
        let rules = self.rules_for(url, user_agent).await;
        let delay = rules
            .crawl_delay(product_token(user_agent))
            .unwrap_or(Duration::ZERO);
        if delay > self.policy.max_crawl_delay {
            debug!(
                "Crawl-delay {:?} for {} capped at {:?}",
                delay, url, self.policy.max_crawl_delay
            );
        }
        delay.min(self.policy.max_crawl_delay)
    }

    /// Returns the rules for the host of `url`, fetching them if needed
    pub async fn rules_for(&self, url: &Url, user_agent: &str) -> Arc<RobotsRules> {
        let slot = self.slot(url);
        let cached = slot
            .get_or_init(|| self.fetch_rules(url, user_agent))
            .await;
        Arc::clone(&cached.rules)
    }

    /// Number of hosts with a cache slot
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry older than the TTL
    pub fn purge_stale(&self) {
        let ttl = self.policy.ttl;
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|_, slot| slot.get().map_or(true, |cached| !cached.is_stale(ttl)));
    }

    fn slot(&self, url: &Url) -> Slot {
        let key = host_key(url);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(slot) = slots.get(&key) {
            let fresh = slot
                .get()
                .map_or(true, |cached| !cached.is_stale(self.policy.ttl));
            if fresh {
                return Arc::clone(slot);
            }
            debug!("Robots.txt for {} expired, refetching", key);
        }

        let slot: Slot = Arc::new(OnceCell::new());
        slots.insert(key, Arc::clone(&slot));
        slot
    }

    async fn fetch_rules(&self, url: &Url, user_agent: &str) -> CachedRobots {
        let rules = match url.join("/robots.txt") {
            Ok(robots_url) => self.download(&robots_url, user_agent).await,
            Err(e) => {
                warn!("Cannot build robots.txt URL for {}: {}", url, e);
                self.failure_rules()
            }
        };
        CachedRobots::new(rules)
    }

    async fn download(&self, robots_url: &Url, user_agent: &str) -> RobotsRules {
        debug!("Fetching {}", robots_url);

        let exchange = async {
            let mut response = self
                .client
                .get(robots_url.clone())
                .header(USER_AGENT, user_agent)
                .send()
                .await?;
            let status = response.status();

            let mut body = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                let room = self.policy.max_body_bytes.saturating_sub(body.len());
                if chunk.len() > room {
                    body.extend_from_slice(&chunk[..room]);
                    debug!("{} larger than {} bytes, truncated", robots_url, body.len());
                    break;
                }
                body.extend_from_slice(&chunk);
            }
            Ok::<_, reqwest::Error>((status, String::from_utf8_lossy(&body).into_owned()))
        };

        match tokio::time::timeout(self.policy.fetch_timeout, exchange).await {
            Ok(Ok((status, body))) => self.rules_for_status(robots_url, status, &body),
            Ok(Err(e)) => {
                warn!("Failed to fetch {}: {}", robots_url, e);
                self.failure_rules()
            }
            Err(_) => {
                warn!("Timed out fetching {}", robots_url);
                self.failure_rules()
            }
        }
    }

    fn rules_for_status(&self, robots_url: &Url, status: StatusCode, body: &str) -> RobotsRules {
        if status.is_success() {
            return RobotsRules::parse(body);
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            warn!("{} answered {}, applying failure policy", robots_url, status);
            return self.failure_rules();
        }

        debug!("{} answered {}, treating as absent", robots_url, status);
        RobotsRules::allow_all()
    }

    fn failure_rules(&self) -> RobotsRules {
        match self.policy.failure {
            RobotsFailurePolicy::Allow => RobotsRules::allow_all(),
            RobotsFailurePolicy::Deny => RobotsRules::deny_all(),
        }
    }
}
