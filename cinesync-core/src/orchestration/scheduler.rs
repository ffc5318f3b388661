use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cinesync_model::{ContentType, FailureKind};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::throttle::ThrottleGate;
use crate::config::{EngineConfig, NotFoundPolicy};
use crate::error::{IngestError, Result};
use crate::providers::{CatalogClient, FetchError};
use crate::state::{
    EligibilityPolicy, FailureDisposition, FailureRecord, LeaseOutcome, LeaseToken,
    StateStore,
};
use crate::upsert::CatalogWriter;

/// Per-run knobs, usually derived from [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub concurrency: usize,
    pub max_retries: u32,
    pub liveness_timeout: Duration,
    pub batch_size: usize,
    pub rate_limit_pause: Duration,
    pub not_found_policy: NotFoundPolicy,
}

impl From<&EngineConfig> for RunOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            max_retries: config.max_retries,
            liveness_timeout: config.liveness_timeout(),
            batch_size: config.batch_size,
            rate_limit_pause: config.rate_limit_pause(),
            not_found_policy: config.not_found_policy,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl RunOptions {
    fn policy(&self) -> EligibilityPolicy {
        EligibilityPolicy::new(self.max_retries, self.liveness_timeout)
    }
}

/// Counters for one scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Scheduling passes that found work.
    pub passes: u64,
    /// Items whose lease was won and a fetch attempted.
    pub attempted: u64,
    pub completed: u64,
    pub not_found: u64,
    /// Failed attempts counted against the retry ceiling.
    pub failed: u64,
    /// Items that reached the retry ceiling during this run.
    pub terminal: u64,
    pub throttled: u64,
    pub lost_races: u64,
    pub lost_leases: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Completed,
    NotFound { terminal: bool },
    Failed { terminal: bool },
    Throttled,
    LostRace,
    LostLease,
    Cancelled,
}

impl RunStats {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Completed => {
                self.attempted += 1;
                self.completed += 1;
            }
            ItemOutcome::NotFound { terminal } => {
                self.attempted += 1;
                self.not_found += 1;
                if terminal {
                    self.terminal += 1;
                } else {
                    self.completed += 1;
                }
            }
            ItemOutcome::Failed { terminal } => {
                self.attempted += 1;
                self.failed += 1;
                if terminal {
                    self.terminal += 1;
                }
            }
            ItemOutcome::Throttled => {
                self.attempted += 1;
                self.throttled += 1;
            }
            ItemOutcome::LostRace => self.lost_races += 1,
            ItemOutcome::LostLease => {
                self.attempted += 1;
                self.lost_leases += 1;
            }
            ItemOutcome::Cancelled => {}
        }
    }
}

/// Drives eligible items through fetch and upsert with bounded concurrency.
///
/// The state store is the only queue: every pass re-reads eligibility, so
/// several schedulers (in one process or many) can share a content type.
#[derive(Clone)]
pub struct IngestScheduler {
    state: Arc<dyn StateStore>,
    client: Arc<dyn CatalogClient>,
    writer: Arc<dyn CatalogWriter>,
    throttle: Arc<ThrottleGate>,
}

impl fmt::Debug for IngestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestScheduler")
            .field("state", &self.state)
            .field("client", &self.client)
            .field("writer", &self.writer)
            .finish()
    }
}

impl IngestScheduler {
    pub fn new(
        state: Arc<dyn StateStore>,
        client: Arc<dyn CatalogClient>,
        writer: Arc<dyn CatalogWriter>,
    ) -> Self {
        Self {
            state,
            client,
            writer,
            throttle: Arc::new(ThrottleGate::new()),
        }
    }

    pub fn throttle(&self) -> Arc<ThrottleGate> {
        Arc::clone(&self.throttle)
    }

    /// Process `content_type` until a pass finds nothing eligible or the
    /// run is cancelled. Per-item failures are recorded, never returned;
    /// only state store errors end the run early.
    pub async fn run(
        &self,
        content_type: ContentType,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunStats> {
        let policy = options.policy();
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let batch_size = options.batch_size.max(1);
        let mut stats = RunStats::default();

        info!(
            target: "ingest::run",
            %content_type,
            concurrency = options.concurrency,
            max_retries = options.max_retries,
            "starting ingestion run"
        );

        loop {
            if cancel.is_cancelled() {
                info!(target: "ingest::run", %content_type, "run cancelled between passes");
                break;
            }

            let ids = self
                .state
                .select_eligible(content_type, batch_size, &policy)
                .await?;
            if ids.is_empty() {
                break;
            }
            stats.passes += 1;
            debug!(
                target: "ingest::run",
                %content_type,
                pass = stats.passes,
                batch = ids.len(),
                "dispatching batch"
            );

            let mut workers = JoinSet::new();
            let mut fatal: Option<IngestError> = None;

            for external_id in ids {
                while let Some(joined) = workers.try_join_next() {
                    collect(joined, &mut stats, &mut fatal);
                }
                if fatal.is_some() || cancel.is_cancelled() {
                    break;
                }

                let permit = tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => {
                        permit.map_err(|_| {
                            IngestError::StateStore("worker pool closed".into())
                        })?
                    }
                };

                let worker = ItemWorker {
                    content_type,
                    external_id,
                    state: Arc::clone(&self.state),
                    client: Arc::clone(&self.client),
                    writer: Arc::clone(&self.writer),
                    throttle: Arc::clone(&self.throttle),
                    options: options.clone(),
                    policy,
                    cancel: cancel.clone(),
                };
                workers.spawn(async move {
                    let _permit = permit;
                    worker.process().await
                });
            }

            while let Some(joined) = workers.join_next().await {
                collect(joined, &mut stats, &mut fatal);
            }

            if let Some(err) = fatal {
                error!(
                    target: "ingest::run",
                    %content_type,
                    error = %err,
                    "state store failure, aborting run"
                );
                return Err(err);
            }
        }

        info!(
            target: "ingest::run",
            %content_type,
            passes = stats.passes,
            attempted = stats.attempted,
            completed = stats.completed,
            not_found = stats.not_found,
            failed = stats.failed,
            terminal = stats.terminal,
            throttled = stats.throttled,
            lost_races = stats.lost_races,
            "ingestion run finished"
        );
        Ok(stats)
    }
}

fn collect(
    joined: std::result::Result<Result<ItemOutcome>, tokio::task::JoinError>,
    stats: &mut RunStats,
    fatal: &mut Option<IngestError>,
) {
    match joined {
        Ok(Ok(outcome)) => stats.record(outcome),
        Ok(Err(err)) => {
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        Err(join_err) => {
            // The item stays in_progress and is reclaimed after the
            // liveness timeout.
            error!(target: "ingest::run", error = %join_err, "worker task panicked");
        }
    }
}

/// Everything one item attempt needs, owned so it can run on its own task.
struct ItemWorker {
    content_type: ContentType,
    external_id: i64,
    state: Arc<dyn StateStore>,
    client: Arc<dyn CatalogClient>,
    writer: Arc<dyn CatalogWriter>,
    throttle: Arc<ThrottleGate>,
    options: RunOptions,
    policy: EligibilityPolicy,
    cancel: CancellationToken,
}

impl ItemWorker {
    async fn process(self) -> Result<ItemOutcome> {
        let content_type = self.content_type;
        let external_id = self.external_id;

        if !self.throttle.wait(&self.cancel).await {
            return Ok(ItemOutcome::Cancelled);
        }

        let lease = match self
            .state
            .mark_in_progress(content_type, external_id, &self.policy)
            .await
        {
            Ok(lease) => lease,
            Err(IngestError::AlreadyLeased { .. }) | Err(IngestError::NotTracked { .. }) => {
                debug!(%content_type, external_id, "lost lease race, skipping");
                return Ok(ItemOutcome::LostRace);
            }
            Err(err) => return Err(err),
        };

        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => None,
            fetched = self.client.fetch(content_type, external_id) => Some(fetched),
        };
        let Some(fetched) = fetched else {
            self.state.release(&lease).await?;
            return Ok(ItemOutcome::Cancelled);
        };

        match fetched {
            Ok(raw) => match self.writer.apply(content_type, external_id, &raw).await {
                Ok(()) => self.complete(&lease).await,
                Err(IngestError::Validation(message)) => {
                    self.fail(&lease, FailureKind::Permanent, message).await
                }
                Err(err) => {
                    self.fail(&lease, FailureKind::Persistence, err.to_string())
                        .await
                }
            },
            Err(FetchError::RateLimited { retry_after }) => {
                let pause = retry_after.unwrap_or(self.options.rate_limit_pause);
                warn!(
                    %content_type,
                    external_id,
                    pause_ms = pause.as_millis() as u64,
                    "catalog rate limit hit, pausing all workers"
                );
                self.throttle.pause(pause).await;
                match self.state.release(&lease).await? {
                    LeaseOutcome::Applied => Ok(ItemOutcome::Throttled),
                    LeaseOutcome::LeaseLost => Ok(ItemOutcome::LostLease),
                }
            }
            Err(FetchError::NotFound) => self.not_found(&lease).await,
            Err(err @ FetchError::Transient(_)) => {
                self.fail(&lease, FailureKind::Transient, err.to_string()).await
            }
            Err(err @ FetchError::Permanent(_)) => {
                self.fail(&lease, FailureKind::Permanent, err.to_string()).await
            }
        }
    }

    async fn complete(&self, lease: &LeaseToken) -> Result<ItemOutcome> {
        match self.state.mark_completed(lease).await? {
            LeaseOutcome::Applied => {
                debug!(
                    content_type = %lease.content_type,
                    external_id = lease.external_id,
                    "item completed"
                );
                Ok(ItemOutcome::Completed)
            }
            LeaseOutcome::LeaseLost => {
                warn!(
                    content_type = %lease.content_type,
                    external_id = lease.external_id,
                    "lease reclaimed before completion was recorded"
                );
                Ok(ItemOutcome::LostLease)
            }
        }
    }

    async fn not_found(&self, lease: &LeaseToken) -> Result<ItemOutcome> {
        match self.options.not_found_policy {
            NotFoundPolicy::MarkCompleted => {
                info!(
                    content_type = %lease.content_type,
                    external_id = lease.external_id,
                    "item no longer in catalog, marking completed"
                );
                Ok(match self.state.mark_completed(lease).await? {
                    LeaseOutcome::Applied => ItemOutcome::NotFound { terminal: false },
                    LeaseOutcome::LeaseLost => ItemOutcome::LostLease,
                })
            }
            NotFoundPolicy::TerminalFailure => {
                let failure = FailureRecord::new(
                    FailureKind::NotFound,
                    FetchError::NotFound.to_string(),
                );
                let disposition = self
                    .state
                    .mark_terminal(lease, &failure, self.options.max_retries)
                    .await?;
                if disposition == FailureDisposition::LeaseLost {
                    return Ok(ItemOutcome::LostLease);
                }
                warn!(
                    content_type = %lease.content_type,
                    external_id = lease.external_id,
                    "item not found in catalog, recorded as terminal failure"
                );
                Ok(ItemOutcome::NotFound { terminal: true })
            }
        }
    }

    async fn fail(
        &self,
        lease: &LeaseToken,
        kind: FailureKind,
        message: String,
    ) -> Result<ItemOutcome> {
        let failure = FailureRecord::new(kind, message);
        let disposition = self
            .state
            .mark_failed(lease, &failure, self.options.max_retries)
            .await?;

        match disposition {
            FailureDisposition::Retryable { retry_count } => {
                if kind == FailureKind::Permanent {
                    error!(
                        content_type = %lease.content_type,
                        external_id = lease.external_id,
                        retry_count,
                        error = %failure.message,
                        "permanent failure"
                    );
                } else {
                    warn!(
                        content_type = %lease.content_type,
                        external_id = lease.external_id,
                        retry_count,
                        error_kind = kind.as_str(),
                        error = %failure.message,
                        "attempt failed, will retry"
                    );
                }
                Ok(ItemOutcome::Failed { terminal: false })
            }
            FailureDisposition::Terminal { retry_count } => {
                error!(
                    content_type = %lease.content_type,
                    external_id = lease.external_id,
                    retry_count,
                    error_kind = kind.as_str(),
                    error = %failure.message,
                    "retry ceiling reached, item is terminally failed"
                );
                Ok(ItemOutcome::Failed { terminal: true })
            }
            FailureDisposition::LeaseLost => Ok(ItemOutcome::LostLease),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_attribute_not_found_by_policy() {
        let mut stats = RunStats::default();
        stats.record(ItemOutcome::NotFound { terminal: true });
        stats.record(ItemOutcome::NotFound { terminal: false });
        stats.record(ItemOutcome::Failed { terminal: true });
        stats.record(ItemOutcome::LostRace);
        stats.record(ItemOutcome::Cancelled);

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.not_found, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.terminal, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.lost_races, 1);
    }

    #[test]
    fn options_follow_engine_config() {
        let config = EngineConfig {
            max_retries: 7,
            concurrency: 2,
            ..EngineConfig::default()
        };
        let options = RunOptions::from(&config);
        assert_eq!(options.max_retries, 7);
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.policy().liveness_timeout, config.liveness_timeout());
    }
}
