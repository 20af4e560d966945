//! Per-host rate limiting
//!
//! Each host gets a token bucket with capacity 1 refilled at the scan's
//! requests-per-second rate. Tokens are refilled from elapsed time whenever
//! the bucket is looked at; there is no background timer. A robots.txt
//! crawl-delay acts as a floor on the spacing between two grants.
//!
//! Waiters for the same host are served in arrival order: the per-host gate is
//! a tokio mutex, which is fair.

use crate::config::EngineConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Longest pause a `Retry-After` header may impose
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Longest single wait the limiter hands out
const MAX_WAIT: Duration = Duration::from_secs(3600);

/// Tunables for the rate limiter
#[derive(Debug, Clone)]
pub struct LimiterPolicy {
    /// Buckets untouched for this long are dropped
    pub idle_eviction: Duration,
    /// Pause applied to a host after a throttling response
    pub throttle_penalty: Duration,
}

impl LimiterPolicy {
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            idle_eviction: Duration::from_secs(engine.idle_eviction),
            throttle_penalty: Duration::from_secs(engine.throttle_penalty),
        }
    }
}

impl Default for LimiterPolicy {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

/// Token bucket state for one host
#[derive(Debug, Clone)]
pub struct RateBudget {
    tokens: f64,
    last_refill: Instant,
    last_grant: Option<Instant>,
    penalty_until: Option<Instant>,
    last_used: Instant,
    granted: u64,
}

impl RateBudget {
    fn new(now: Instant) -> Self {
        Self {
            tokens: 1.0,
            last_refill: now,
            last_grant: None,
            penalty_until: None,
            last_used: now,
            granted: 0,
        }
    }

    fn refill(&mut self, now: Instant, requests_per_second: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * requests_per_second).min(1.0);
        self.last_refill = now;
    }

    /// Takes a token if one is due
    ///
    /// # Returns
    ///
    /// * `None` - Granted
    /// * `Some(wait)` - Nothing to grant for at least `wait`
    fn try_grant(
        &mut self,
        now: Instant,
        requests_per_second: f64,
        min_delay: Duration,
    ) -> Option<Duration> {
        self.refill(now, requests_per_second);
        self.last_used = now;

        if let Some(until) = self.penalty_until {
            if now < until {
                return Some(until - now);
            }
            self.penalty_until = None;
        }

        if let Some(last) = self.last_grant {
            let spacing = min_delay.saturating_sub(now.saturating_duration_since(last));
            if !spacing.is_zero() {
                return Some(spacing.min(MAX_WAIT));
            }
        }

        // Tolerate float drift after sleeping exactly the computed wait
        if self.tokens >= 1.0 - 1e-9 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            self.last_grant = Some(now);
            self.granted += 1;
            return None;
        }

        let missing = 1.0 - self.tokens;
        let wait = Duration::try_from_secs_f64(missing / requests_per_second).unwrap_or(MAX_WAIT);
        Some(wait.clamp(Duration::from_micros(1), MAX_WAIT))
    }

    fn penalize(&mut self, now: Instant, penalty: Duration) {
        let until = now + penalty.min(MAX_WAIT);
        if self.penalty_until.map_or(true, |current| current < until) {
            self.penalty_until = Some(until);
        }
    }

    fn is_idle(&self, now: Instant, idle: Duration) -> bool {
        let penalized = self.penalty_until.is_some_and(|until| until > now);
        !penalized && now.saturating_duration_since(self.last_used) >= idle
    }
}

#[derive(Debug)]
struct HostLimiter {
    gate: tokio::sync::Mutex<()>,
    budget: Mutex<RateBudget>,
}

impl HostLimiter {
    fn budget(&self) -> MutexGuard<'_, RateBudget> {
        self.budget.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// How a request made under a permit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitOutcome {
    /// A response arrived
    Response {
        status: u16,
        retry_after: Option<Duration>,
    },
    /// No response (timeout, connection failure)
    NoResponse,
}

impl PermitOutcome {
    pub fn status(status: u16) -> Self {
        Self::Response {
            status,
            retry_after: None,
        }
    }

    fn is_throttling(&self) -> bool {
        matches!(self, Self::Response { status: 429 | 503, .. })
    }
}

/// Permission to send one request to a host
#[derive(Debug)]
#[must_use = "a permit should be reported once the request finishes"]
pub struct RatePermit {
    host: String,
    limiter: Arc<HostLimiter>,
    penalty: Duration,
}

impl RatePermit {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Records how the request went; throttling responses pause the host
    pub fn report(self, outcome: PermitOutcome) {
        if !outcome.is_throttling() {
            return;
        }

        let penalty = match outcome {
            PermitOutcome::Response {
                retry_after: Some(retry_after),
                ..
            } => retry_after.min(MAX_RETRY_AFTER).max(self.penalty),
            _ => self.penalty,
        };

        debug!("Host {} is throttling us, pausing for {:?}", self.host, penalty);
        self.limiter.budget().penalize(Instant::now(), penalty);
    }
}

/// Per-host rate limiter shared by every scan in the process
#[derive(Debug)]
pub struct RateLimiter {
    hosts: Mutex<HashMap<String, Arc<HostLimiter>>>,
    policy: LimiterPolicy,
}

impl RateLimiter {
    pub fn new(policy: LimiterPolicy) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            policy,
        }
    }

    fn hosts(&self) -> MutexGuard<'_, HashMap<String, Arc<HostLimiter>>> {
        self.hosts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn host_limiter(&self, host: &str) -> Arc<HostLimiter> {
        let now = Instant::now();
        let mut hosts = self.hosts();
        let idle = self.policy.idle_eviction;
        hosts.retain(|key, limiter| {
            key == host || Arc::strong_count(limiter) > 1 || !limiter.budget().is_idle(now, idle)
        });

        Arc::clone(hosts.entry(host.to_string()).or_insert_with(|| {
            Arc::new(HostLimiter {
                gate: tokio::sync::Mutex::new(()),
                budget: Mutex::new(RateBudget::new(now)),
            })
        }))
    }

    /// Waits until a request to `host` is allowed
    ///
    /// # Arguments
    ///
    /// * `host` - Host key (scheme, host, port)
    /// * `requests_per_second` - Ceiling on the request rate; must be positive
    /// * `min_delay` - Minimum spacing between grants (crawl-delay)
    pub async fn acquire(
        &self,
        host: &str,
        requests_per_second: f64,
        min_delay: Duration,
    ) -> RatePermit {
        let limiter = self.host_limiter(host);
        let _turn = limiter.gate.lock().await;

        loop {
            let wait = limiter
                .budget()
                .try_grant(Instant::now(), requests_per_second, min_delay);
            match wait {
                None => break,
                Some(wait) => {
                    trace!("Waiting {:?} for a permit to {}", wait, host);
                    tokio::time::sleep(wait).await;
                }
            }
        }

        RatePermit {
            host: host.to_string(),
            limiter: Arc::clone(&limiter),
            penalty: self.policy.throttle_penalty,
        }
    }

    /// Drops buckets that have been idle past the eviction window
    pub fn evict_idle(&self) {
        let now = Instant::now();
        let idle = self.policy.idle_eviction;
        let mut hosts = self.hosts();
        let before = hosts.len();
        hosts.retain(|_, limiter| {
            Arc::strong_count(limiter) > 1 || !limiter.budget().is_idle(now, idle)
        });
        if hosts.len() < before {
            debug!("Evicted {} idle rate buckets", before - hosts.len());
        }
    }

    /// Number of hosts with a live bucket
    pub fn tracked_hosts(&self) -> usize {
        self.hosts().len()
    }

    /// Number of permits granted to `host` since its bucket was created
    pub fn granted(&self, host: &str) -> u64 {
        self.hosts()
            .get(host)
            .map_or(0, |limiter| limiter.budget().granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "https://example.com:443";

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(LimiterPolicy {
            idle_eviction: Duration::from_secs(10),
            throttle_penalty: Duration::from_secs(5),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_permit_is_immediate() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.acquire(HOST, 1.0, Duration::ZERO).await.report(PermitOutcome::status(200));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_spacing() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(HOST, 2.0, Duration::ZERO).await.report(PermitOutcome::status(200));
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2100), "elapsed {:?}", elapsed);
        assert_eq!(limiter.granted(HOST), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_delay_is_a_floor() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..3 {
            let _ = limiter.acquire(HOST, 10.0, Duration::from_secs(1)).await;
        }
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_bound() {
        let limiter = limiter();
        let rps = 4.0;
        let mut grants = Vec::new();
        for _ in 0..12 {
            let _ = limiter.acquire(HOST, rps, Duration::ZERO).await;
            grants.push(Instant::now());
        }

        for (i, start) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < Duration::from_secs(1))
                .count();
            assert!(in_window as f64 <= rps + 1.0, "{} grants in one second", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_values_do_not_overflow() {
        let now = Instant::now();
        let mut budget = RateBudget::new(now);

        assert_eq!(budget.try_grant(now, 1e-300, Duration::ZERO), None);
        assert_eq!(budget.try_grant(now, 1e-300, Duration::ZERO), Some(MAX_WAIT));

        let mut budget = RateBudget::new(now);
        assert_eq!(budget.try_grant(now, 1.0, Duration::MAX), None);
        assert!(budget.try_grant(now, 1.0, Duration::MAX).is_some());

        budget.penalize(now, Duration::MAX);
        assert!(budget.penalty_until.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let limiter = limiter();
        let start = Instant::now();
        let _ = limiter.acquire("https://a.example:443", 1.0, Duration::ZERO).await;
        let _ = limiter.acquire("https://b.example:443", 1.0, Duration::ZERO).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_response_applies_penalty() {
        let limiter = limiter();
        limiter.acquire(HOST, 100.0, Duration::ZERO).await.report(PermitOutcome::status(429));

        let start = Instant::now();
        let _ = limiter.acquire(HOST, 100.0, Duration::ZERO).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_extends_penalty() {
        let limiter = limiter();
        limiter
            .acquire(HOST, 100.0, Duration::ZERO)
            .await
            .report(PermitOutcome::Response {
                status: 503,
                retry_after: Some(Duration::from_secs(20)),
            });

        let start = Instant::now();
        let _ = limiter.acquire(HOST, 100.0, Duration::ZERO).await;
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordinary_errors_do_not_penalize() {
        let limiter = limiter();
        limiter.acquire(HOST, 100.0, Duration::ZERO).await.report(PermitOutcome::status(500));
        limiter.acquire(HOST, 100.0, Duration::ZERO).await.report(PermitOutcome::NoResponse);

        let start = Instant::now();
        let _ = limiter.acquire(HOST, 100.0, Duration::ZERO).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_order() {
        let limiter = limiter();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the first token so everyone else has to queue
        let _ = limiter.acquire(HOST, 1.0, Duration::ZERO).await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _ = limiter.acquire(HOST, 1.0, Duration::ZERO).await;
                order.lock().unwrap().push(i);
            }));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_buckets_evicted() {
        let limiter = limiter();
        let _ = limiter.acquire(HOST, 1.0, Duration::ZERO).await;
        assert_eq!(limiter.tracked_hosts(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.evict_idle();
        assert_eq!(limiter.tracked_hosts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalized_bucket_not_evicted() {
        let limiter = limiter();
        limiter.acquire(HOST, 1.0, Duration::ZERO).await.report(PermitOutcome::Response {
            status: 429,
            retry_after: Some(Duration::from_secs(60)),
        });

        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.evict_idle();
        assert_eq!(limiter.tracked_hosts(), 1);
    }
}
