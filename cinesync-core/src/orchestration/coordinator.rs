use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use cinesync_model::{ContentType, ProcessingState};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::scheduler::{IngestScheduler, RunOptions, RunStats};
use crate::config::EngineConfig;
use crate::error::{IngestError, Result};
use crate::listing::ListingSource;
use crate::providers::CatalogClient;
use crate::state::{SeedOutcome, StateStore, StatusSummary};
use crate::upsert::CatalogWriter;

/// Terminal failures listed in a sync summary.
pub const TERMINAL_REPORT_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Drain already-tracked items without consulting the listing source.
    pub skip_listing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub content_type: ContentType,
    /// Ids reported by the listing source; `None` when skipped or failed.
    pub listed: Option<usize>,
    pub seeded: SeedOutcome,
    pub run: RunStats,
    pub status: StatusSummary,
    pub terminal_failures: Vec<ProcessingState>,
}

/// Top-level loop: list, seed, drain, summarize.
#[derive(Clone)]
pub struct RunCoordinator {
    state: Arc<dyn StateStore>,
    writer: Arc<dyn CatalogWriter>,
    listing: Option<Arc<dyn ListingSource>>,
    /// `None` for a store-only coordinator; `sync` then refuses to run.
    scheduler: Option<IngestScheduler>,
    config: EngineConfig,
}

impl fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("listing", &self.listing)
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .finish()
    }
}

impl RunCoordinator {
    pub fn new(
        state: Arc<dyn StateStore>,
        client: Arc<dyn CatalogClient>,
        writer: Arc<dyn CatalogWriter>,
        config: EngineConfig,
    ) -> Self {
        let scheduler =
            IngestScheduler::new(Arc::clone(&state), client, Arc::clone(&writer));
        Self {
            state,
            writer,
            listing: None,
            scheduler: Some(scheduler),
            config,
        }
    }

    /// Coordinator for operations that never fetch: `seed`, `retry_failed`
    /// and `refresh_stale`. Calling `sync` on it is a configuration error.
    pub fn without_client(
        state: Arc<dyn StateStore>,
        writer: Arc<dyn CatalogWriter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            state,
            writer,
            listing: None,
            scheduler: None,
            config,
        }
    }

    pub fn with_listing(mut self, listing: Arc<dyn ListingSource>) -> Self {
        self.listing = Some(listing);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.state
    }

    /// Safe to re-run: seeding ignores known ids and completed items are
    /// never eligible, so a second sync only re-checks eligibility.
    pub async fn sync(
        &self,
        content_type: ContentType,
        options: SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary> {
        let scheduler = self.scheduler.as_ref().ok_or_else(|| {
            IngestError::Config("sync requires a catalog client".to_string())
        })?;
        let mut listed = None;
        let mut seeded = SeedOutcome::default();

        match (&self.listing, options.skip_listing) {
            (Some(listing), false) => match listing.list_ids(content_type).await {
                Ok(ids) => {
                    listed = Some(ids.len());
                    seeded = self.seed(content_type, &ids).await?;
                }
                Err(err) => {
                    warn!(
                        target: "ingest::sync",
                        %content_type,
                        error = %err,
                        "listing failed, draining already tracked items"
                    );
                }
            },
            (None, false) => {
                info!(target: "ingest::sync", %content_type, "no listing source configured");
            }
            (_, true) => {}
        }

        let run = scheduler
            .run(content_type, &RunOptions::from(&self.config), cancel)
            .await?;
        let status = self
            .state
            .summarize(content_type, self.config.max_retries)
            .await?;
        let terminal_failures = self
            .state
            .terminal_failures(content_type, self.config.max_retries, TERMINAL_REPORT_LIMIT)
            .await?;

        info!(
            target: "ingest::sync",
            %content_type,
            listed = listed.unwrap_or(0),
            seeded = seeded.inserted,
            completed = status.completed,
            failed_retryable = status.failed_retryable,
            failed_terminal = status.failed_terminal,
            pending = status.pending,
            "sync finished"
        );

        Ok(SyncSummary {
            content_type,
            listed,
            seeded,
            run,
            status,
            terminal_failures,
        })
    }

    pub async fn seed(
        &self,
        content_type: ContentType,
        external_ids: &[i64],
    ) -> Result<SeedOutcome> {
        let outcome = self.state.seed(content_type, external_ids).await?;
        info!(
            target: "ingest::seed",
            %content_type,
            inserted = outcome.inserted,
            already_tracked = outcome.already_tracked,
            "seeded state store"
        );
        Ok(outcome)
    }

    /// Re-queue completed entities not refreshed within `refresh_after`.
    /// Returns the number of items scheduled.
    pub async fn refresh_stale(
        &self,
        content_type: ContentType,
        limit: usize,
    ) -> Result<u64> {
        let cutoff = Utc::now() - self.config.refresh_after();
        let stale = self.writer.stale_ids(content_type, cutoff, limit).await?;
        if stale.is_empty() {
            info!(target: "ingest::refresh", %content_type, "nothing to refresh");
            return Ok(0);
        }
        let scheduled = self.state.schedule_refresh(content_type, &stale).await?;
        info!(
            target: "ingest::refresh",
            %content_type,
            stale = stale.len(),
            scheduled,
            "scheduled stale entities for refresh"
        );
        Ok(scheduled)
    }

    pub async fn retry_failed(&self, content_type: Option<ContentType>) -> Result<u64> {
        let reset = self.state.reset_failed(content_type).await?;
        info!(
            target: "ingest::retry",
            content_type = content_type.map(ContentType::as_str).unwrap_or("all"),
            reset,
            "failed items returned to pending"
        );
        Ok(reset)
    }
}
