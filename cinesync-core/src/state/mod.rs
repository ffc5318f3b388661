//! Durable per-item progress tracking.
//!
//! The `processing_state` row is the only lease mechanism: claiming an item is
//! a conditional transition to `in_progress` that exactly one caller can win,
//! so workers in independent processes coordinate through the store alone.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinesync_model::{ContentType, FailureKind, ProcessingState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::EngineConfig, error::Result};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStateStore;
pub use postgres::PostgresStateStore;

/// Identifies one claim on an item; stale claims cannot complete or fail it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Proof of a successful `mark_in_progress`.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseToken {
    pub content_type: ContentType,
    pub external_id: i64,
    pub lease_id: LeaseId,
    /// Failures recorded before this attempt.
    pub retry_count: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Which rows may be claimed right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityPolicy {
    pub max_retries: u32,
    /// `in_progress` rows older than this are treated as abandoned.
    pub liveness_timeout: Duration,
}

impl EligibilityPolicy {
    pub fn new(max_retries: u32, liveness_timeout: Duration) -> Self {
        Self {
            max_retries,
            liveness_timeout,
        }
    }
}

impl From<&EngineConfig> for EligibilityPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self::new(config.max_retries, config.liveness_timeout())
    }
}

/// Error recorded against an item by `mark_failed`/`mark_terminal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of a lease-guarded transition that has no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Applied,
    /// The item was reclaimed by another worker; nothing was written.
    LeaseLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Still under the retry ceiling; a later pass will pick it up.
    Retryable { retry_count: u32 },
    /// Ceiling reached; excluded from scheduling but still queryable.
    Terminal { retry_count: u32 },
    LeaseLost,
}

impl FailureDisposition {
    pub(crate) fn from_count(retry_count: u32, max_retries: u32) -> Self {
        if retry_count >= max_retries {
            FailureDisposition::Terminal { retry_count }
        } else {
            FailureDisposition::Retryable { retry_count }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedOutcome {
    pub inserted: u64,
    pub already_tracked: u64,
}

/// Row counts per status for one content type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed_retryable: u64,
    pub failed_terminal: u64,
}

impl StatusSummary {
    pub fn total(&self) -> u64 {
        self.pending
            + self.in_progress
            + self.completed
            + self.failed_retryable
            + self.failed_terminal
    }

    pub fn completion_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.completed as f64 / total as f64 * 100.0
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Track ids not seen before as `pending`; known ids are left untouched.
    async fn seed(
        &self,
        content_type: ContentType,
        external_ids: &[i64],
    ) -> Result<SeedOutcome>;

    /// Claim an eligible item. Fails with `AlreadyLeased` when another caller
    /// holds it or it is not currently eligible, `NotTracked` when unknown.
    async fn mark_in_progress(
        &self,
        content_type: ContentType,
        external_id: i64,
        policy: &EligibilityPolicy,
    ) -> Result<LeaseToken>;

    async fn mark_completed(&self, lease: &LeaseToken) -> Result<LeaseOutcome>;

    /// Record a failed attempt, incrementing `retry_count`.
    async fn mark_failed(
        &self,
        lease: &LeaseToken,
        failure: &FailureRecord,
        max_retries: u32,
    ) -> Result<FailureDisposition>;

    /// Record a failure that must not be retried (the retry ceiling is
    /// reached immediately).
    async fn mark_terminal(
        &self,
        lease: &LeaseToken,
        failure: &FailureRecord,
        max_retries: u32,
    ) -> Result<FailureDisposition>;

    /// Give the item back without counting the attempt.
    async fn release(&self, lease: &LeaseToken) -> Result<LeaseOutcome>;

    /// Pending first, then retryable failures by oldest attempt, then
    /// abandoned `in_progress` rows.
    async fn select_eligible(
        &self,
        content_type: ContentType,
        limit: usize,
        policy: &EligibilityPolicy,
    ) -> Result<Vec<i64>>;

    async fn get(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> Result<Option<ProcessingState>>;

    async fn summarize(
        &self,
        content_type: ContentType,
        max_retries: u32,
    ) -> Result<StatusSummary>;

    async fn terminal_failures(
        &self,
        content_type: ContentType,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<ProcessingState>>;

    /// Operator override: every failed item goes back to `pending` with a
    /// fresh retry budget. Returns the number of rows reset.
    async fn reset_failed(&self, content_type: Option<ContentType>) -> Result<u64>;

    /// Force re-fetch of tracked items (typically stale completed ones).
    /// Rows currently `in_progress` are skipped.
    async fn schedule_refresh(
        &self,
        content_type: ContentType,
        external_ids: &[i64],
    ) -> Result<u64>;
}

/// Sorted, de-duplicated copy of an id list.
pub(crate) fn unique_ids(external_ids: &[i64]) -> Vec<i64> {
    let mut ids = external_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_turns_terminal_at_ceiling() {
        assert_eq!(
            FailureDisposition::from_count(2, 3),
            FailureDisposition::Retryable { retry_count: 2 }
        );
        assert_eq!(
            FailureDisposition::from_count(3, 3),
            FailureDisposition::Terminal { retry_count: 3 }
        );
    }

    #[test]
    fn summary_totals_every_bucket() {
        let summary = StatusSummary {
            pending: 1,
            in_progress: 2,
            completed: 3,
            failed_retryable: 1,
            failed_terminal: 1,
        };
        assert_eq!(summary.total(), 8);
        assert!((summary.completion_rate() - 37.5).abs() < f64::EPSILON);
        assert_eq!(StatusSummary::default().completion_rate(), 0.0);
    }
}
