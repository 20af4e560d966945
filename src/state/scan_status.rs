//! Scan job lifecycle
//!
//! `queued -> running -> {done, failed}`. The only path that changes a job's
//! status is [`ScanLifecycle::transition`].

use crate::storage::ScanJob;
use crate::ScanError;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Status of a scan job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanStatus {
    /// Created by the API collaborator, not yet picked up
    Queued,
    /// Being crawled
    Running,
    /// Frontier drained or budgets exhausted
    Done,
    /// Seed unreachable, internal error, or cancelled
    Failed,
}

impl ScanStatus {
    /// Returns true for `done` and `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Checks whether the state machine permits moving to `to`
    pub fn can_transition_to(&self, to: ScanStatus) -> bool {
        matches!(
            (self, to),
            (Self::Queued, Self::Running) | (Self::Running, Self::Done) | (Self::Running, Self::Failed)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Authoritative in-memory state of one scan job
#[derive(Debug, Clone)]
pub struct ScanLifecycle {
    job: ScanJob,
}

impl ScanLifecycle {
    pub fn new(job: ScanJob) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &ScanJob {
        &self.job
    }

    pub fn status(&self) -> ScanStatus {
        self.job.status
    }

    /// Moves the job to `to`, advancing `updated_at`
    ///
    /// `updated_at` strictly increases even if the wall clock does not.
    ///
    /// # Returns
    ///
    /// * `Ok(DateTime<Utc>)` - The new `updated_at`
    /// * `Err(ScanError::InvalidTransition)` - The state machine forbids the move
    pub fn transition(&mut self, to: ScanStatus) -> Result<DateTime<Utc>, ScanError> {
        let from = self.job.status;
        if !from.can_transition_to(to) {
            return Err(ScanError::InvalidTransition { from, to });
        }

        let now = Utc::now();
        let updated_at = if now > self.job.updated_at {
            now
        } else {
            self.job.updated_at + Duration::microseconds(1)
        };

        self.job.status = to;
        self.job.updated_at = updated_at;

        tracing::debug!("Scan {} transitioned {} -> {}", self.job.id, from, to);
        Ok(updated_at)
    }
}
