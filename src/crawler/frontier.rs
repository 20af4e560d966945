//! Crawl frontier
//!
//! The frontier is the single source of truth for which URLs a scan will
//! fetch. It deduplicates by normalized URL and enforces the depth and page
//! budgets at admission time, so a URL that got in is always within budget.
//! Entries come out breadth-first: lower depth first, FIFO within a depth.

use crate::url::normalize_parsed;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;
use url::Url;

/// Lifecycle of a URL inside the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Queued,
    InFlight,
    Visited,
}

/// A URL admitted to the frontier
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    /// Normalized URL
    pub url: Url,

    /// Link distance from the seed (the seed is 0)
    pub depth: u32,

    /// Admission order, used as the tie-break within a depth
    seq: u64,
}

// BinaryHeap is a max-heap; invert so the shallowest, oldest entry pops first
impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .depth
            .cmp(&self.depth)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for FrontierEntry {}

#[derive(Debug, Default)]
struct FrontierState {
    queue: BinaryHeap<FrontierEntry>,
    entries: HashMap<String, EntryStatus>,
    accepted: u32,
    in_flight: usize,
    next_seq: u64,
    closed: bool,
}

/// Bounded, deduplicating work queue shared by the workers of one scan
#[derive(Debug)]
pub struct Frontier {
    state: Mutex<FrontierState>,
    changed: Notify,
    max_depth: u32,
    max_pages: u32,
}

impl Frontier {
    pub fn new(max_depth: u32, max_pages: u32) -> Self {
        Self {
            state: Mutex::new(FrontierState::default()),
            changed: Notify::new(),
            max_depth,
            max_pages,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admits `url` at `depth`
    ///
    /// # Returns
    ///
    /// * `true` - The URL was queued
    /// * `false` - Duplicate, too deep, over the page budget, unusable, or
    ///   the frontier is closed
    pub fn enqueue(&self, url: Url, depth: u32) -> bool {
        if depth > self.max_depth {
            trace!("Rejecting {} at depth {}: too deep", url, depth);
            return false;
        }

        let url = match normalize_parsed(url) {
            Ok(url) => url,
            Err(e) => {
                trace!("Rejecting unnormalizable URL: {}", e);
                return false;
            }
        };

        {
            let mut state = self.lock();
            if state.closed
                || state.accepted >= self.max_pages
                || state.entries.contains_key(url.as_str())
            {
                return false;
            }

            state.entries.insert(url.to_string(), EntryStatus::Queued);
            state.accepted += 1;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(FrontierEntry { url, depth, seq });
        }

        self.changed.notify_waiters();
        true
    }

    /// Takes the next entry without waiting
    pub fn dequeue(&self) -> Option<FrontierEntry> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let entry = state.queue.pop()?;
        state.entries.insert(entry.url.to_string(), EntryStatus::InFlight);
        state.in_flight += 1;
        Some(entry)
    }

    /// Waits for the next entry
    ///
    /// Returns `None` once the frontier is closed, or once it is drained:
    /// nothing queued and nothing in flight that could still add links.
    pub async fn next(&self) -> Option<FrontierEntry> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(entry) = state.queue.pop() {
                    state.entries.insert(entry.url.to_string(), EntryStatus::InFlight);
                    state.in_flight += 1;
                    return Some(entry);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }

            changed.await;
        }
    }

    /// Marks an in-flight entry as visited
    pub fn complete(&self, entry: &FrontierEntry) {
        {
            let mut state = self.lock();
            if let Some(status) = state.entries.get_mut(entry.url.as_str()) {
                if *status == EntryStatus::InFlight {
                    *status = EntryStatus::Visited;
                    state.in_flight = state.in_flight.saturating_sub(1);
                }
            }
        }
        self.changed.notify_waiters();
    }

    /// Stops handing out work; waiting callers of `next` return `None`
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns the status of a URL, if it was ever admitted
    pub fn status_of(&self, url: &Url) -> Option<EntryStatus> {
        let url = normalize_parsed(url.clone()).ok()?;
        self.lock().entries.get(url.as_str()).copied()
    }

    /// Number of URLs admitted so far, seed included
    pub fn accepted(&self) -> u32 {
        self.lock().accepted
    }

    /// Number of entries waiting to be dequeued
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Whether nothing is queued and nothing is in flight
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.in_flight == 0
    }
}
