//! Scan orchestration
//!
//! This module drives one scan job from `queued` to a terminal state:
//! - Admitting the seed and fetching it before anything else
//! - Running the fetch, extract, enqueue pipeline under a bounded pool
//! - Retrying transient failures with backoff
//! - Persisting every artifact through the `ScanStore`
//! - Honoring cancellation with a bounded grace period

use crate::config::{validate_scan_configuration, ScanConfiguration};
use crate::crawler::extractor::{extract, Extraction};
use crate::crawler::fetcher::{FetchError, FetchErrorKind, FetchedPage, Fetcher};
use crate::crawler::frontier::{Frontier, FrontierEntry};
use crate::crawler::limiter::PermitOutcome;
use crate::crawler::ScanContext;
use crate::fingerprint::TechSignal;
use crate::state::{PageOutcome, ScanLifecycle, ScanStatus};
use crate::storage::{DiscoveredUrl, ExtractedForm, ScanJob, ScanStore, TechnologyFingerprint};
use crate::url::{host_key, normalize_parsed, ScopeFilter};
use crate::{ScanError, UrlError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Summary of a finished scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub scan_id: i64,
    /// Terminal status
    pub status: ScanStatus,
    /// URLs that produced a response, whatever its status
    pub pages_fetched: u64,
    /// URLs that failed without a usable response
    pub pages_failed: u64,
    /// URLs not fetched: disallowed by robots.txt or not text
    pub pages_skipped: u64,
    /// Distinct forms recorded
    pub forms: u64,
    /// Distinct technologies recorded
    pub fingerprints: u64,
    pub elapsed: Duration,
    /// Why the scan failed
    pub failure: Option<String>,
}

#[derive(Debug, Default)]
struct ScanCounters {
    processed: AtomicU64,
    fetched: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    forms: AtomicU64,
    fingerprints: AtomicU64,
}

impl ScanCounters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// What happened to one frontier entry
#[derive(Debug)]
enum PageResult {
    /// robots.txt forbids the URL
    Disallowed,
    Fetched(FetchedPage),
    Failed(FetchError),
}

/// State of one running scan, shared by its page tasks
struct ScanRun {
    scan_id: i64,
    config: ScanConfiguration,
    context: Arc<ScanContext>,
    store: Arc<dyn ScanStore>,
    fetcher: Fetcher,
    frontier: Frontier,
    scope: ScopeFilter,
    cancel: CancellationToken,
    counters: ScanCounters,
    seen_fingerprints: Mutex<HashSet<TechSignal>>,
    started: Instant,
}

impl ScanRun {
    /// Fetches an entry, following redirects one hop at a time
    ///
    /// Every hop goes through the scope filter, robots.txt and the rate
    /// limiter. A redirect that leaves the scope or hits a disallowed path is
    /// not followed; the 3xx itself becomes the result and its `Location` is
    /// offered to the frontier like any other link.
    async fn process(&self, entry: &FrontierEntry) -> PageResult {
        let mut current = entry.url.clone();
        let mut redirect: Option<FetchedPage> = None;
        let mut hops = 0;

        loop {
            let Some(min_delay) = self.politeness_delay(&current).await else {
                return match redirect {
                    Some(page) => {
                        debug!("Not following {} to disallowed {}", entry.url, current);
                        PageResult::Fetched(page)
                    }
                    None => PageResult::Disallowed,
                };
            };

            let page = match self.fetch_with_retry(&current, min_delay).await {
                Ok(page) => page,
                Err(e) => return PageResult::Failed(e),
            };

            let Some(next) = self.redirect_target(&page) else {
                return PageResult::Fetched(page);
            };
            if !self.scope.contains(&next) {
                debug!("Not following {} out of scope to {}", entry.url, next);
                return PageResult::Fetched(page);
            }

            hops += 1;
            if hops > self.context.engine().max_redirects {
                return PageResult::Failed(FetchError {
                    kind: FetchErrorKind::TooManyRedirects,
                    status: Some(page.status),
                    message: format!(
                        "more than {} redirects",
                        self.context.engine().max_redirects
                    ),
                });
            }

            trace!("{} redirected to {}", current, next);
            current = next;
            redirect = Some(page);
        }
    }

    /// Crawl delay for `url`, or `None` when robots.txt forbids it
    async fn politeness_delay(&self, url: &Url) -> Option<Duration> {
        if !self.config.respect_robots {
            return Some(Duration::ZERO);
        }

        let politeness = self.context.politeness();
        if !politeness.is_allowed(url, &self.config.user_agent).await {
            return None;
        }
        Some(politeness.crawl_delay(url, &self.config.user_agent).await)
    }

    /// Where a redirect points, when redirects are followed
    fn redirect_target(&self, page: &FetchedPage) -> Option<Url> {
        if !self.config.follow_redirects || !page.is_redirect() {
            return None;
        }
        let location = page.header("location")?;
        let next = page.final_url.join(location).ok()?;
        normalize_parsed(next).ok()
    }

    async fn fetch_with_retry(
        &self,
        url: &Url,
        min_delay: Duration,
    ) -> Result<FetchedPage, FetchError> {
        let host = host_key(url);
        let retry = *self.context.retry();
        let mut attempt = 0;

        loop {
            let permit = self
                .context
                .limiter()
                .acquire(&host, self.config.requests_per_second, min_delay)
                .await;

            let result = self.fetcher.fetch(url).await;
            permit.report(permit_outcome(&result));

            let transient = match &result {
                Ok(page) => (500..600).contains(&page.status),
                Err(e) => e.is_transient(),
            };
            if !transient || attempt >= retry.attempts {
                return result;
            }

            let delay = retry.delay_for(attempt);
            attempt += 1;
            match &result {
                Ok(page) => warn!(
                    "{} answered {}, retry {}/{} in {:?}",
                    url, page.status, attempt, retry.attempts, delay
                ),
                Err(e) => warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    url, e, attempt, retry.attempts, delay
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return result,
            }
        }
    }

    /// Persists the result of one entry and admits its links
    fn record(&self, entry: &FrontierEntry, result: PageResult) {
        match result {
            PageResult::Disallowed => {
                info!("{} disallowed by robots.txt, skipping", entry.url);
                ScanCounters::bump(&self.counters.skipped);
            }
            PageResult::Fetched(page) => {
                ScanCounters::bump(&self.counters.fetched);
                let outcome = PageOutcome::from_status(page.status);
                debug!(
                    "{} -> {} ({}, depth {}{})",
                    entry.url,
                    page.status,
                    outcome,
                    entry.depth,
                    if page.truncated { ", truncated" } else { "" }
                );

                self.save_url(entry, Some(page.status), outcome, None);

                let extraction = extract(&page, &self.scope, self.context.signatures());
                self.save_extraction(entry, &page, extraction);
            }
            PageResult::Failed(err) => {
                let outcome = PageOutcome::from_fetch_error(err.kind);
                if err.kind == FetchErrorKind::NonTextContent {
                    debug!("{} skipped: {}", entry.url, err);
                    ScanCounters::bump(&self.counters.skipped);
                } else {
                    warn!("{} failed: {}", entry.url, err);
                    ScanCounters::bump(&self.counters.failed);
                }
                self.save_url(entry, err.status, outcome, Some(err.to_string()));
            }
        }

        self.log_progress();
    }

    /// Records an entry whose page task died
    fn record_crash(&self, entry: &FrontierEntry, reason: &str) {
        error!("Page task for {} crashed: {}", entry.url, reason);
        ScanCounters::bump(&self.counters.failed);
        self.save_url(
            entry,
            None,
            PageOutcome::Failed,
            Some(format!("page task crashed: {}", reason)),
        );
        self.log_progress();
    }

    fn save_url(
        &self,
        entry: &FrontierEntry,
        status_code: Option<u16>,
        outcome: PageOutcome,
        error: Option<String>,
    ) {
        let record = DiscoveredUrl {
            scan_id: self.scan_id,
            url: entry.url.to_string(),
            status_code,
            depth: entry.depth,
            outcome,
            error,
        };
        if let Err(e) = self.store.save_discovered_url(&record) {
            warn!("Failed to store {}: {}", entry.url, e);
        }
    }

    fn save_extraction(&self, entry: &FrontierEntry, page: &FetchedPage, extraction: Extraction) {
        let page_url = entry.url.to_string();

        for form in extraction.forms {
            let record = ExtractedForm {
                scan_id: self.scan_id,
                page_url: page_url.clone(),
                form,
            };
            match self.store.save_extracted_form(&record) {
                Ok(true) => {
                    ScanCounters::bump(&self.counters.forms);
                }
                Ok(false) => trace!("Form on {} already recorded", page_url),
                Err(e) => warn!("Failed to store form on {}: {}", page_url, e),
            }
        }

        for signal in extraction.fingerprints {
            let first_sighting = self
                .seen_fingerprints
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(signal.clone());
            if !first_sighting {
                continue;
            }

            info!("Detected {} on {}", signal, page.final_url);
            let record = TechnologyFingerprint {
                scan_id: self.scan_id,
                source_url: page_url.clone(),
                signal,
            };
            match self.store.save_fingerprint(&record) {
                Ok(()) => {
                    ScanCounters::bump(&self.counters.fingerprints);
                }
                Err(e) => warn!("Failed to store fingerprint: {}", e),
            }
        }

        let mut admitted = 0;
        for link in extraction.links {
            if self.frontier.enqueue(link, entry.depth + 1) {
                admitted += 1;
            }
        }
        if admitted > 0 {
            debug!("{} new URLs from {}", admitted, entry.url);
        }
    }

    fn log_progress(&self) {
        let processed = ScanCounters::bump(&self.counters.processed);
        if processed % 10 == 0 {
            let rate = processed as f64 / self.started.elapsed().as_secs_f64().max(0.001);
            info!(
                "Scan {} progress: {} pages processed, {} queued, {} in flight, {:.2} pages/sec",
                self.scan_id,
                processed,
                self.frontier.queued(),
                self.frontier.in_flight(),
                rate
            );
        }
    }

    fn report(&self, status: ScanStatus, failure: Option<String>) -> ScanReport {
        let c = &self.counters;
        ScanReport {
            scan_id: self.scan_id,
            status,
            pages_fetched: c.fetched.load(Ordering::Relaxed),
            pages_failed: c.failed.load(Ordering::Relaxed),
            pages_skipped: c.skipped.load(Ordering::Relaxed),
            forms: c.forms.load(Ordering::Relaxed),
            fingerprints: c.fingerprints.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
            failure,
        }
    }
}

fn permit_outcome(result: &Result<FetchedPage, FetchError>) -> PermitOutcome {
    match result {
        Ok(page) => PermitOutcome::Response {
            status: page.status,
            retry_after: page
                .header("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        },
        Err(e) => match e.status {
            Some(status) => PermitOutcome::status(status),
            None => PermitOutcome::NoResponse,
        },
    }
}

/// How a scan's page loop ended
enum LoopEnd {
    Drained,
    Cancelled,
}

/// Drives scan jobs to completion
pub struct Orchestrator {
    context: Arc<ScanContext>,
    store: Arc<dyn ScanStore>,
}

impl Orchestrator {
    pub fn new(context: Arc<ScanContext>, store: Arc<dyn ScanStore>) -> Self {
        Self { context, store }
    }

    /// Runs the scan for a queued job
    ///
    /// Per-page failures never fail the scan. The scan fails when the seed
    /// cannot be fetched after its retries, when setup fails, or when
    /// `cancel` fires.
    ///
    /// # Returns
    ///
    /// * `Ok(ScanReport)` - The scan reached `done` or `failed`
    /// * `Err(ScanError::InvalidTransition)` - The job was not `queued`
    pub async fn run(
        &self,
        job: ScanJob,
        config: ScanConfiguration,
        cancel: CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let mut lifecycle = ScanLifecycle::new(job);
        let scan_id = lifecycle.job().id;
        let target = lifecycle.job().target.clone();

        self.transition(&mut lifecycle, ScanStatus::Running)?;
        info!("Scan {} started against {}", scan_id, target);

        let run = match self.prepare(scan_id, &target, config, cancel) {
            Ok(run) => Arc::new(run),
            Err(e) => {
                error!("Scan {} could not start: {}", scan_id, e);
                self.transition(&mut lifecycle, ScanStatus::Failed)?;
                return Ok(ScanReport {
                    scan_id,
                    status: ScanStatus::Failed,
                    pages_fetched: 0,
                    pages_failed: 0,
                    pages_skipped: 0,
                    forms: 0,
                    fingerprints: 0,
                    elapsed: Duration::ZERO,
                    failure: Some(e.to_string()),
                });
            }
        };

        let (status, failure) = match self.crawl(&run, &target).await {
            Ok(LoopEnd::Drained) => (ScanStatus::Done, None),
            Ok(LoopEnd::Cancelled) => (
                ScanStatus::Failed,
                Some(ScanError::Cancelled(scan_id).to_string()),
            ),
            Err(e) => (ScanStatus::Failed, Some(e.to_string())),
        };

        self.transition(&mut lifecycle, status)?;
        let report = run.report(status, failure);

        match &report.failure {
            None => info!(
                "Scan {} done: {} fetched, {} failed, {} skipped in {:?}",
                scan_id, report.pages_fetched, report.pages_failed, report.pages_skipped, report.elapsed
            ),
            Some(reason) => warn!("Scan {} failed: {}", scan_id, reason),
        }

        Ok(report)
    }

    fn prepare(
        &self,
        scan_id: i64,
        target: &Url,
        config: ScanConfiguration,
        cancel: CancellationToken,
    ) -> Result<ScanRun, ScanError> {
        validate_scan_configuration(&config)?;

        let engine = self.context.engine();
        let fetcher = Fetcher::new(&config, engine)?;
        let frontier = Frontier::new(config.max_depth, config.max_pages);
        let scope = ScopeFilter::new(engine.link_scope, target);

        self.context.politeness().purge_stale();
        self.context.limiter().evict_idle();

        Ok(ScanRun {
            scan_id,
            config,
            context: Arc::clone(&self.context),
            store: Arc::clone(&self.store),
            fetcher,
            frontier,
            scope,
            cancel,
            counters: ScanCounters::default(),
            seen_fingerprints: Mutex::new(HashSet::new()),
            started: Instant::now(),
        })
    }

    /// Single path for status changes; store failures are logged only
    fn transition(&self, lifecycle: &mut ScanLifecycle, to: ScanStatus) -> Result<(), ScanError> {
        let updated_at = lifecycle.transition(to)?;
        let id = lifecycle.job().id;
        if let Err(e) = self.store.update_job_status(id, to, updated_at) {
            warn!("Failed to persist status {} for scan {}: {}", to, id, e);
        }
        Ok(())
    }

    async fn crawl(&self, run: &Arc<ScanRun>, target: &Url) -> Result<LoopEnd, ScanError> {
        if !run.frontier.enqueue(target.clone(), 0) {
            return Err(UrlError::Malformed(target.to_string()).into());
        }

        let Some(seed) = run.frontier.dequeue() else {
            return Ok(LoopEnd::Drained);
        };

        // The seed runs alone: if it is unreachable nothing else is attempted
        let mut seed_task = {
            let run = Arc::clone(run);
            let seed = seed.clone();
            tokio::spawn(async move { run.process(&seed).await })
        };

        let seed_result = tokio::select! {
            joined = &mut seed_task => joined,
            _ = run.cancel.cancelled() => {
                run.frontier.close();
                let grace = Duration::from_secs(self.context.engine().cancel_grace);
                match tokio::time::timeout(grace, &mut seed_task).await {
                    Ok(Ok(result)) => run.record(&seed, result),
                    Ok(Err(_)) => {}
                    Err(_) => seed_task.abort(),
                }
                return Ok(LoopEnd::Cancelled);
            }
        };

        match seed_result {
            Ok(PageResult::Failed(err)) if err.kind != FetchErrorKind::NonTextContent => {
                run.frontier.close();
                return Err(ScanError::SeedUnreachable {
                    url: seed.url.to_string(),
                    source: err,
                });
            }
            Ok(result) => run.record(&seed, result),
            Err(join_error) => {
                run.frontier.close();
                return Err(ScanError::SeedUnreachable {
                    url: seed.url.to_string(),
                    source: FetchError::new(
                        FetchErrorKind::ProtocolError,
                        format!("seed task crashed: {}", join_error),
                    ),
                });
            }
        }
        run.frontier.complete(&seed);

        self.work(run).await
    }

    /// Runs page tasks until the frontier drains or the scan is cancelled
    async fn work(&self, run: &Arc<ScanRun>) -> Result<LoopEnd, ScanError> {
        let workers = self.context.engine().workers.max(1) as usize;
        let mut tasks = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, FrontierEntry> = HashMap::new();

        loop {
            tokio::select! {
                biased;

                _ = run.cancel.cancelled() => {
                    info!("Scan {} cancelled, closing frontier", run.scan_id);
                    run.frontier.close();
                    self.wind_down(run, &mut tasks, &mut running).await;
                    return Ok(LoopEnd::Cancelled);
                }

                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    settle(run, &mut running, joined);
                }

                next = run.frontier.next(), if tasks.len() < workers => {
                    match next {
                        Some(entry) => {
                            let task_run = Arc::clone(run);
                            let task_entry = entry.clone();
                            let handle = tasks.spawn(async move {
                                let result = task_run.process(&task_entry).await;
                                task_run.record(&task_entry, result);
                            });
                            running.insert(handle.id(), entry);
                        }
                        None if tasks.is_empty() => return Ok(LoopEnd::Drained),
                        None => {}
                    }
                }
            }
        }
    }

    /// Lets in-flight pages finish within the grace period, then aborts them
    async fn wind_down(
        &self,
        run: &Arc<ScanRun>,
        tasks: &mut JoinSet<()>,
        running: &mut HashMap<tokio::task::Id, FrontierEntry>,
    ) {
        let grace = Duration::from_secs(self.context.engine().cancel_grace);

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next_with_id().await {
                settle(run, running, joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Scan {}: aborting {} page tasks after {:?} grace period",
                run.scan_id,
                tasks.len(),
                grace
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

/// Handles a finished page task
fn settle(
    run: &ScanRun,
    running: &mut HashMap<tokio::task::Id, FrontierEntry>,
    joined: Result<(tokio::task::Id, ()), tokio::task::JoinError>,
) {
    let (id, crash) = match joined {
        Ok((id, ())) => (id, None),
        Err(e) => (e.id(), Some(e)),
    };

    let Some(entry) = running.remove(&id) else {
        return;
    };

    if let Some(e) = crash {
        if e.is_panic() {
            run.record_crash(&entry, "panicked");
        }
    }
    run.frontier.complete(&entry);
}
