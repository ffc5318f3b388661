//! # Cinesync Core
//!
//! Incremental, resumable ingestion of the TMDB catalog (movies, TV series
//! and people) into PostgreSQL.
//!
//! ## Overview
//!
//! - **State tracking**: one `processing_state` row per catalog item. The row
//!   doubles as the lease, so any number of workers or processes can share
//!   the same queue safely.
//! - **Upserts**: each fetched record is normalized and written in a single
//!   transaction; associations (genres, cast, crew, ...) are replaced, never
//!   appended.
//! - **Scheduling**: bounded-concurrency workers with classified failures,
//!   a retry ceiling and a pool-wide pause when the catalog throttles.
//! - **Coordination**: list, seed, drain and summarize a content type.
//!
//! ## Architecture
//!
//! - [`state`]: the [`StateStore`](state::StateStore) trait and its Postgres
//!   and in-memory implementations
//! - [`upsert`]: record normalization and [`CatalogWriter`](upsert::CatalogWriter)s
//! - [`providers`]: the catalog client
//! - [`listing`]: sources of known ids (daily exports, files)
//! - [`orchestration`]: scheduler and run coordinator
//! - [`reporting`]: read-only aggregate queries
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cinesync_core::{
//!     EngineConfig, InMemoryCatalogWriter, InMemoryStateStore, RunCoordinator,
//!     StaticListingSource, SyncOptions, TmdbClient, TmdbConfig,
//! };
//! use cinesync_model::ContentType;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn sync_in_memory() -> cinesync_core::Result<()> {
//!     let client = TmdbClient::new(&TmdbConfig {
//!         api_key: Some("api-key".into()),
//!         ..TmdbConfig::default()
//!     })?;
//!     let coordinator = RunCoordinator::new(
//!         Arc::new(InMemoryStateStore::new()),
//!         Arc::new(client),
//!         Arc::new(InMemoryCatalogWriter::new()),
//!         EngineConfig::default(),
//!     )
//!     .with_listing(Arc::new(
//!         StaticListingSource::new().with_ids(ContentType::Movie, vec![550, 680]),
//!     ));
//!
//!     let summary = coordinator
//!         .sync(ContentType::Movie, SyncOptions::default(), &CancellationToken::new())
//!         .await?;
//!     println!("{} completed", summary.status.completed);
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]

pub mod config;
pub mod database;
pub mod error;
pub mod listing;
pub mod orchestration;
pub mod providers;
pub mod reporting;
pub mod state;
pub mod upsert;

pub use config::{EngineConfig, NotFoundPolicy, TmdbConfig};
pub use error::{IngestError, Result};
pub use listing::{DailyExportSource, FileListingSource, ListingSource, StaticListingSource};
pub use orchestration::{
    IngestScheduler, RunCoordinator, RunOptions, RunStats, SyncOptions, SyncSummary,
    ThrottleGate,
};
pub use providers::{CatalogClient, FetchError, TmdbClient};
pub use reporting::ReportingRepository;
pub use state::{
    EligibilityPolicy, FailureDisposition, FailureRecord, InMemoryStateStore, LeaseOutcome,
    LeaseToken, PostgresStateStore, SeedOutcome, StateStore, StatusSummary,
};
pub use upsert::{CatalogWriter, InMemoryCatalogWriter, PostgresCatalogWriter};
