use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cinesync_model::{ContentType, ProcessingState, ProcessingStatus};

use super::{
    EligibilityPolicy, FailureDisposition, FailureRecord, LeaseId, LeaseOutcome,
    LeaseToken, SeedOutcome, StateStore, StatusSummary, unique_ids,
};
use crate::error::{IngestError, Result, truncate_error_message};

type Key = (ContentType, i64);

#[derive(Debug, Clone)]
struct Entry {
    state: ProcessingState,
    lease: Option<LeaseId>,
}

/// Process-local state store with the same transition rules as the Postgres
/// implementation. Used by the DB-free scheduler and coordinator tests.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    rows: Arc<tokio::sync::Mutex<HashMap<Key, Entry>>>,
}

impl fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryStateStore");
        match self.rows.try_lock() {
            Ok(rows) => {
                debug.field("tracked", &rows.len());
            }
            Err(_) => {
                debug.field("rows", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift an item's `last_attempt_at` into the past, as if the attempt
    /// started `age` ago. Test hook for liveness reclaim.
    #[doc(hidden)]
    pub async fn backdate_attempt(
        &self,
        content_type: ContentType,
        external_id: i64,
        age: std::time::Duration,
    ) {
        let mut rows = self.rows.lock().await;
        if let Some(entry) = rows.get_mut(&(content_type, external_id)) {
            let age = chrono::Duration::from_std(age)
                .unwrap_or(chrono::Duration::MAX);
            entry.state.last_attempt_at = entry.state.last_attempt_at.map(|at| {
                at.checked_sub_signed(age)
                    .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
            });
        }
    }
}

fn is_eligible(state: &ProcessingState, policy: &EligibilityPolicy) -> bool {
    match state.status {
        ProcessingStatus::Pending => true,
        ProcessingStatus::Failed => state.retry_count < policy.max_retries,
        ProcessingStatus::InProgress => is_abandoned(state, policy),
        ProcessingStatus::Completed => false,
    }
}

fn is_abandoned(state: &ProcessingState, policy: &EligibilityPolicy) -> bool {
    let timeout = chrono::Duration::from_std(policy.liveness_timeout)
        .unwrap_or(chrono::Duration::MAX);
    match state.last_attempt_at {
        Some(at) => Utc::now().signed_duration_since(at) > timeout,
        None => true,
    }
}

fn status_tier(status: ProcessingStatus) -> u8 {
    match status {
        ProcessingStatus::Pending => 0,
        ProcessingStatus::Failed => 1,
        _ => 2,
    }
}

/// Returns the entry only while `lease` still owns it.
fn leased_entry<'a>(
    rows: &'a mut HashMap<Key, Entry>,
    lease: &LeaseToken,
) -> Option<&'a mut Entry> {
    rows.get_mut(&(lease.content_type, lease.external_id))
        .filter(|entry| {
            entry.state.status == ProcessingStatus::InProgress
                && entry.lease == Some(lease.lease_id)
        })
}

fn record_failure(entry: &mut Entry, failure: &FailureRecord, retry_count: u32) {
    let now = Utc::now();
    entry.lease = None;
    entry.state.status = ProcessingStatus::Failed;
    entry.state.retry_count = retry_count;
    entry.state.error_kind = Some(failure.kind);
    entry.state.error_message = Some(truncate_error_message(&failure.message));
    entry.state.last_attempt_at = Some(now);
    entry.state.updated_at = now;
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn seed(
        &self,
        content_type: ContentType,
        external_ids: &[i64],
    ) -> Result<SeedOutcome> {
        let mut rows = self.rows.lock().await;
        let mut outcome = SeedOutcome::default();
        for id in unique_ids(external_ids) {
            let key = (content_type, id);
            if rows.contains_key(&key) {
                outcome.already_tracked += 1;
            } else {
                rows.insert(
                    key,
                    Entry {
                        state: ProcessingState::pending(content_type, id),
                        lease: None,
                    },
                );
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn mark_in_progress(
        &self,
        content_type: ContentType,
        external_id: i64,
        policy: &EligibilityPolicy,
    ) -> Result<LeaseToken> {
        let mut rows = self.rows.lock().await;
        let entry = rows.get_mut(&(content_type, external_id)).ok_or(
            IngestError::NotTracked {
                content_type,
                external_id,
            },
        )?;

        if !is_eligible(&entry.state, policy) {
            return Err(IngestError::AlreadyLeased {
                content_type,
                external_id,
            });
        }

        let now = Utc::now();
        let lease_id = LeaseId::new();
        entry.lease = Some(lease_id);
        entry.state.status = ProcessingStatus::InProgress;
        entry.state.last_attempt_at = Some(now);
        entry.state.updated_at = now;

        Ok(LeaseToken {
            content_type,
            external_id,
            lease_id,
            retry_count: entry.state.retry_count,
            acquired_at: now,
        })
    }

    async fn mark_completed(&self, lease: &LeaseToken) -> Result<LeaseOutcome> {
        let mut rows = self.rows.lock().await;
        let Some(entry) = leased_entry(&mut rows, lease) else {
            return Ok(LeaseOutcome::LeaseLost);
        };

        let now = Utc::now();
        entry.lease = None;
        entry.state.status = ProcessingStatus::Completed;
        entry.state.completed_at = Some(now);
        entry.state.error_kind = None;
        entry.state.error_message = None;
        entry.state.updated_at = now;
        Ok(LeaseOutcome::Applied)
    }

    async fn mark_failed(
        &self,
        lease: &LeaseToken,
        failure: &FailureRecord,
        max_retries: u32,
    ) -> Result<FailureDisposition> {
        let mut rows = self.rows.lock().await;
        let Some(entry) = leased_entry(&mut rows, lease) else {
            return Ok(FailureDisposition::LeaseLost);
        };

        let retry_count = (entry.state.retry_count + 1).min(max_retries);
        record_failure(entry, failure, retry_count);
        Ok(FailureDisposition::from_count(retry_count, max_retries))
    }

    async fn mark_terminal(
        &self,
        lease: &LeaseToken,
        failure: &FailureRecord,
        max_retries: u32,
    ) -> Result<FailureDisposition> {
        let mut rows = self.rows.lock().await;
        let Some(entry) = leased_entry(&mut rows, lease) else {
            return Ok(FailureDisposition::LeaseLost);
        };

        let retry_count = entry.state.retry_count.max(max_retries);
        record_failure(entry, failure, retry_count);
        Ok(FailureDisposition::Terminal { retry_count })
    }

    async fn release(&self, lease: &LeaseToken) -> Result<LeaseOutcome> {
        let mut rows = self.rows.lock().await;
        let Some(entry) = leased_entry(&mut rows, lease) else {
            return Ok(LeaseOutcome::LeaseLost);
        };

        entry.lease = None;
        entry.state.status = if entry.state.retry_count > 0 {
            ProcessingStatus::Failed
        } else {
            ProcessingStatus::Pending
        };
        entry.state.updated_at = Utc::now();
        Ok(LeaseOutcome::Applied)
    }

    async fn select_eligible(
        &self,
        content_type: ContentType,
        limit: usize,
        policy: &EligibilityPolicy,
    ) -> Result<Vec<i64>> {
        let rows = self.rows.lock().await;
        let mut eligible: Vec<&ProcessingState> = rows
            .values()
            .map(|entry| &entry.state)
            .filter(|state| state.content_type == content_type)
            .filter(|state| is_eligible(state, policy))
            .collect();

        // `None` sorts before `Some`, matching NULLS FIRST.
        eligible.sort_by(|a, b| {
            status_tier(a.status)
                .cmp(&status_tier(b.status))
                .then(a.last_attempt_at.cmp(&b.last_attempt_at))
                .then(a.external_id.cmp(&b.external_id))
        });

        Ok(eligible
            .into_iter()
            .take(limit)
            .map(|state| state.external_id)
            .collect())
    }

    async fn get(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> Result<Option<ProcessingState>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .get(&(content_type, external_id))
            .map(|entry| entry.state.clone()))
    }

    async fn summarize(
        &self,
        content_type: ContentType,
        max_retries: u32,
    ) -> Result<StatusSummary> {
        let rows = self.rows.lock().await;
        let mut summary = StatusSummary::default();
        for entry in rows.values() {
            let state = &entry.state;
            if state.content_type != content_type {
                continue;
            }
            match state.status {
                ProcessingStatus::Pending => summary.pending += 1,
                ProcessingStatus::InProgress => summary.in_progress += 1,
                ProcessingStatus::Completed => summary.completed += 1,
                ProcessingStatus::Failed if state.retry_count >= max_retries => {
                    summary.failed_terminal += 1
                }
                ProcessingStatus::Failed => summary.failed_retryable += 1,
            }
        }
        Ok(summary)
    }

    async fn terminal_failures(
        &self,
        content_type: ContentType,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<ProcessingState>> {
        let rows = self.rows.lock().await;
        let mut terminal: Vec<ProcessingState> = rows
            .values()
            .map(|entry| &entry.state)
            .filter(|state| {
                state.content_type == content_type
                    && state.is_terminal(max_retries)
            })
            .cloned()
            .collect();
        terminal.sort_by(|a, b| {
            b.last_attempt_at
                .cmp(&a.last_attempt_at)
                .then(a.external_id.cmp(&b.external_id))
        });
        terminal.truncate(limit);
        Ok(terminal)
    }

    async fn reset_failed(&self, content_type: Option<ContentType>) -> Result<u64> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let mut reset = 0;
        for entry in rows.values_mut() {
            let state = &mut entry.state;
            if state.status != ProcessingStatus::Failed {
                continue;
            }
            if content_type.is_some_and(|ct| ct != state.content_type) {
                continue;
            }
            state.status = ProcessingStatus::Pending;
            state.retry_count = 0;
            state.error_kind = None;
            state.error_message = None;
            state.updated_at = now;
            reset += 1;
        }
        Ok(reset)
    }

    async fn schedule_refresh(
        &self,
        content_type: ContentType,
        external_ids: &[i64],
    ) -> Result<u64> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let mut scheduled = 0;
        for id in unique_ids(external_ids) {
            let Some(entry) = rows.get_mut(&(content_type, id)) else {
                continue;
            };
            if entry.state.status == ProcessingStatus::InProgress {
                continue;
            }
            entry.state.status = ProcessingStatus::Pending;
            entry.state.retry_count = 0;
            entry.state.error_kind = None;
            entry.state.error_message = None;
            entry.state.updated_at = now;
            scheduled += 1;
        }
        Ok(scheduled)
    }
}
