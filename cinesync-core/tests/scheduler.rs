use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cinesync_core::{
    CatalogClient, EligibilityPolicy, EngineConfig, FailureDisposition, FailureRecord,
    FetchError, IngestError, IngestScheduler, InMemoryCatalogWriter, InMemoryStateStore,
    LeaseOutcome, ListingSource, NotFoundPolicy, RunCoordinator, RunOptions,
    StateStore, StaticListingSource, SyncOptions,
};
use cinesync_model::{ContentType, FailureKind, ProcessingStatus};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Catalog double: per-item scripted responses, then a fallback record.
#[derive(Debug, Default)]
struct ScriptedCatalog {
    scripts: Mutex<HashMap<(ContentType, i64), VecDeque<Result<Value, FetchError>>>>,
    records: Mutex<HashMap<(ContentType, i64), Value>>,
    calls: AtomicUsize,
}

impl ScriptedCatalog {
    fn with_record(self, content_type: ContentType, id: i64, record: Value) -> Self {
        self.records
            .lock()
            .unwrap()
            .insert((content_type, id), record);
        self
    }

    fn script(
        self,
        content_type: ContentType,
        id: i64,
        responses: Vec<Result<Value, FetchError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert((content_type, id), responses.into());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogClient for ScriptedCatalog {
    async fn fetch(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&(content_type, external_id))
            .and_then(VecDeque::pop_front);
        if let Some(response) = scripted {
            return response;
        }
        self.records
            .lock()
            .unwrap()
            .get(&(content_type, external_id))
            .cloned()
            .ok_or(FetchError::NotFound)
    }
}

#[derive(Debug)]
struct BrokenListing;

#[async_trait]
impl ListingSource for BrokenListing {
    async fn list_ids(&self, _content_type: ContentType) -> cinesync_core::Result<Vec<i64>> {
        Err(IngestError::Listing("export not published yet".into()))
    }
}

fn movie(id: i64, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "release_date": "1999-10-15",
        "genres": [{"id": 18, "name": "Drama"}],
    })
}

fn config(max_retries: u32) -> EngineConfig {
    EngineConfig {
        max_retries,
        concurrency: 4,
        rate_limit_pause_ms: 1_000,
        ..EngineConfig::default()
    }
}

struct Harness {
    state: Arc<InMemoryStateStore>,
    writer: Arc<InMemoryCatalogWriter>,
    catalog: Arc<ScriptedCatalog>,
    coordinator: RunCoordinator,
}

fn harness(catalog: ScriptedCatalog, config: EngineConfig) -> Harness {
    let state = Arc::new(InMemoryStateStore::new());
    let writer = Arc::new(InMemoryCatalogWriter::new());
    let catalog = Arc::new(catalog);
    let coordinator = RunCoordinator::new(
        state.clone(),
        catalog.clone(),
        writer.clone(),
        config,
    );
    Harness {
        state,
        writer,
        catalog,
        coordinator,
    }
}

#[tokio::test]
async fn fight_club_is_upserted_with_absent_external_id() {
    let record = json!({
        "id": 550,
        "title": "Fight Club",
        "imdb_id": "",
        "genres": [{"id": 18, "name": "Drama"}, {"id": 53, "name": "Thriller"}],
        "external_ids": {"imdb_id": "", "wikidata_id": "Q190050"}
    });
    let h = harness(
        ScriptedCatalog::default().with_record(ContentType::Movie, 550, record),
        config(3),
    );
    let coordinator = h.coordinator.clone().with_listing(Arc::new(
        StaticListingSource::new().with_ids(ContentType::Movie, vec![550]),
    ));

    let summary = coordinator
        .sync(ContentType::Movie, SyncOptions::default(), &CancellationToken::new())
        .await
        .expect("sync");

    assert_eq!(summary.listed, Some(1));
    assert_eq!(summary.seeded.inserted, 1);
    assert_eq!(summary.run.completed, 1);
    assert_eq!(summary.status.completed, 1);

    let stored = h.writer.movie(550).await.expect("movie stored");
    assert_eq!(stored.genres.len(), 2);
    assert_eq!(stored.external_ids.imdb_id, None);
    assert_eq!(stored.movie.imdb_id, None);

    let state = h.state.get(ContentType::Movie, 550).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Completed);
    assert!(state.completed_at.is_some());
    assert_eq!(state.error_message, None);
}

#[tokio::test(start_paused = true)]
async fn rate_limits_pause_the_pool_without_spending_retries() {
    let throttled = || {
        Err(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        })
    };
    let catalog = ScriptedCatalog::default()
        .with_record(ContentType::Movie, 550, movie(550, "Fight Club"))
        .script(
            ContentType::Movie,
            550,
            vec![throttled(), throttled(), throttled()],
        );
    let h = harness(catalog, config(3));
    h.coordinator.seed(ContentType::Movie, &[550]).await.unwrap();

    let summary = h
        .coordinator
        .sync(
            ContentType::Movie,
            SyncOptions { skip_listing: true },
            &CancellationToken::new(),
        )
        .await
        .expect("sync");

    assert_eq!(summary.run.throttled, 3);
    assert_eq!(summary.run.failed, 0);
    assert_eq!(summary.run.completed, 1);
    assert_eq!(h.catalog.calls(), 4);

    let state = h.state.get(ContentType::Movie, 550).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Completed);
    assert_eq!(state.retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn throttle_pause_holds_back_other_workers() {
    let catalog = ScriptedCatalog::default()
        .with_record(ContentType::Movie, 1, movie(1, "One"))
        .with_record(ContentType::Movie, 2, movie(2, "Two"))
        .script(
            ContentType::Movie,
            1,
            vec![Err(FetchError::RateLimited { retry_after: None })],
        );
    let h = harness(
        catalog,
        EngineConfig {
            concurrency: 1,
            rate_limit_pause_ms: 30_000,
            ..config(3)
        },
    );
    h.coordinator.seed(ContentType::Movie, &[1, 2]).await.unwrap();

    let start = tokio::time::Instant::now();
    let summary = h
        .coordinator
        .sync(
            ContentType::Movie,
            SyncOptions { skip_listing: true },
            &CancellationToken::new(),
        )
        .await
        .expect("sync");

    assert_eq!(summary.run.completed, 2);
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test]
async fn transient_errors_exhaust_retries_and_become_terminal() {
    let transient = || Err(FetchError::Transient("connection reset".into()));
    let catalog = ScriptedCatalog::default().script(
        ContentType::Movie,
        13,
        vec![transient(), transient(), transient(), transient()],
    );
    let h = harness(catalog, config(3));
    h.coordinator.seed(ContentType::Movie, &[13]).await.unwrap();

    let summary = h
        .coordinator
        .sync(
            ContentType::Movie,
            SyncOptions { skip_listing: true },
            &CancellationToken::new(),
        )
        .await
        .expect("sync");

    assert_eq!(summary.run.failed, 3);
    assert_eq!(summary.run.terminal, 1);
    assert_eq!(h.catalog.calls(), 3, "never fetched past the ceiling");
    assert_eq!(summary.status.failed_terminal, 1);
    assert_eq!(summary.terminal_failures.len(), 1);
    assert_eq!(
        summary.terminal_failures[0].error_kind,
        Some(FailureKind::Transient)
    );

    let state = h.state.get(ContentType::Movie, 13).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Failed);
    assert_eq!(state.retry_count, 3);

    let policy = EligibilityPolicy::new(3, Duration::from_secs(3600));
    let eligible = h
        .state
        .select_eligible(ContentType::Movie, 10, &policy)
        .await
        .unwrap();
    assert!(eligible.is_empty());
}

#[tokio::test]
async fn retry_count_only_grows_until_the_ceiling() {
    let h = harness(ScriptedCatalog::default(), config(3));
    h.coordinator.seed(ContentType::Movie, &[7]).await.unwrap();
    let policy = EligibilityPolicy::new(3, Duration::from_secs(3600));
    let failure = FailureRecord::new(FailureKind::Transient, "timeout");

    let mut previous = 0;
    for attempt in 1..=3 {
        let lease = h
            .state
            .mark_in_progress(ContentType::Movie, 7, &policy)
            .await
            .expect("eligible while under ceiling");
        let disposition = h.state.mark_failed(&lease, &failure, 3).await.unwrap();
        let retry_count = match disposition {
            FailureDisposition::Retryable { retry_count } => retry_count,
            FailureDisposition::Terminal { retry_count } => {
                assert_eq!(attempt, 3);
                retry_count
            }
            FailureDisposition::LeaseLost => panic!("lease lost"),
        };
        assert!(retry_count > previous);
        assert!(retry_count <= 3);
        previous = retry_count;
    }

    let err = h
        .state
        .mark_in_progress(ContentType::Movie, 7, &policy)
        .await
        .expect_err("terminal items cannot be leased");
    assert!(matches!(err, IngestError::AlreadyLeased { .. }));
}

#[tokio::test]
async fn abandoned_attempt_is_reclaimed_after_liveness_timeout() {
    let catalog =
        ScriptedCatalog::default().with_record(ContentType::Movie, 680, movie(680, "Pulp Fiction"));
    let h = harness(catalog, config(3));
    h.coordinator.seed(ContentType::Movie, &[680]).await.unwrap();

    // A worker claims the item and then dies.
    let policy = EligibilityPolicy::new(3, Duration::from_secs(3600));
    let crashed = h
        .state
        .mark_in_progress(ContentType::Movie, 680, &policy)
        .await
        .unwrap();

    let options = SyncOptions { skip_listing: true };
    let first = h
        .coordinator
        .sync(ContentType::Movie, options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.run.attempted, 0, "fresh lease is respected");
    assert_eq!(first.status.in_progress, 1);

    h.state
        .backdate_attempt(ContentType::Movie, 680, Duration::from_secs(2 * 3600))
        .await;
    let second = h
        .coordinator
        .sync(ContentType::Movie, options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.run.completed, 1);

    let state = h.state.get(ContentType::Movie, 680).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Completed);
    assert_eq!(state.retry_count, 0);

    // The dead worker waking up has no effect.
    let failure = FailureRecord::new(FailureKind::Transient, "late failure");
    assert_eq!(
        h.state.mark_failed(&crashed, &failure, 3).await.unwrap(),
        FailureDisposition::LeaseLost
    );
    assert_eq!(
        h.state.mark_completed(&crashed).await.unwrap(),
        LeaseOutcome::LeaseLost
    );
    let state = h.state.get(ContentType::Movie, 680).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_produce_exactly_one_lease() {
    let state = Arc::new(InMemoryStateStore::new());
    state.seed(ContentType::Person, &[287]).await.unwrap();
    let policy = EligibilityPolicy::new(3, Duration::from_secs(3600));

    let claims = (0..32).map(|_| {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state
                .mark_in_progress(ContentType::Person, 287, &policy)
                .await
        })
    });
    let results = futures::future::join_all(claims).await;

    let mut won = 0;
    let mut already_leased = 0;
    for result in results {
        match result.expect("task joined") {
            Ok(_) => won += 1,
            Err(IngestError::AlreadyLeased { .. }) => already_leased += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(already_leased, 31);
}

#[tokio::test]
async fn competing_schedulers_never_fetch_an_item_twice() {
    let mut catalog = ScriptedCatalog::default();
    let ids: Vec<i64> = (1..=40).collect();
    for id in &ids {
        catalog = catalog.with_record(ContentType::Movie, *id, movie(*id, "Title"));
    }
    let catalog = Arc::new(catalog);
    let state = Arc::new(InMemoryStateStore::new());
    let writer = Arc::new(InMemoryCatalogWriter::new());
    state.seed(ContentType::Movie, &ids).await.unwrap();

    let scheduler = || IngestScheduler::new(state.clone(), catalog.clone(), writer.clone());
    let options = RunOptions {
        concurrency: 4,
        batch_size: 10,
        ..RunOptions::default()
    };
    let cancel = CancellationToken::new();
    let (first, second) = (scheduler(), scheduler());
    let (a, b) = tokio::join!(
        first.run(ContentType::Movie, &options, &cancel),
        second.run(ContentType::Movie, &options, &cancel),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.completed + b.completed, 40);
    assert_eq!(catalog.calls(), 40);
    assert_eq!(writer.len().await, 40);
}

#[tokio::test]
async fn not_found_policy_decides_terminal_or_completed() {
    let terminal = harness(ScriptedCatalog::default(), config(3));
    terminal.coordinator.seed(ContentType::TvSeries, &[404]).await.unwrap();
    let summary = terminal
        .coordinator
        .sync(
            ContentType::TvSeries,
            SyncOptions { skip_listing: true },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.run.not_found, 1);
    assert_eq!(summary.run.terminal, 1);
    assert_eq!(terminal.catalog.calls(), 1, "not found is never retried");
    let state = terminal
        .state
        .get(ContentType::TvSeries, 404)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.status, ProcessingStatus::Failed);
    assert_eq!(state.retry_count, 3);
    assert_eq!(state.error_kind, Some(FailureKind::NotFound));

    let retired = harness(
        ScriptedCatalog::default(),
        EngineConfig {
            not_found_policy: NotFoundPolicy::MarkCompleted,
            ..config(3)
        },
    );
    retired.coordinator.seed(ContentType::TvSeries, &[404]).await.unwrap();
    let summary = retired
        .coordinator
        .sync(
            ContentType::TvSeries,
            SyncOptions { skip_listing: true },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.run.not_found, 1);
    assert_eq!(summary.status.completed, 1);
    assert!(retired.writer.is_empty().await);
}

#[tokio::test]
async fn invalid_records_are_recorded_as_permanent_failures() {
    let catalog = ScriptedCatalog::default().with_record(
        ContentType::Movie,
        550,
        json!({"id": 551, "title": "Wrong id"}),
    );
    let h = harness(catalog, config(2));
    h.coordinator.seed(ContentType::Movie, &[550]).await.unwrap();

    let summary = h
        .coordinator
        .sync(
            ContentType::Movie,
            SyncOptions { skip_listing: true },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.run.failed, 2);
    assert_eq!(summary.run.terminal, 1);
    let state = h.state.get(ContentType::Movie, 550).await.unwrap().unwrap();
    assert_eq!(state.error_kind, Some(FailureKind::Permanent));
    assert!(
        state
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("does not match")
    );
    assert!(h.writer.is_empty().await);
}

#[tokio::test]
async fn second_sync_does_no_redundant_work() {
    let catalog = ScriptedCatalog::default()
        .with_record(ContentType::Movie, 1, movie(1, "One"))
        .with_record(ContentType::Movie, 2, movie(2, "Two"));
    let h = harness(catalog, config(3));
    let coordinator = h.coordinator.clone().with_listing(Arc::new(
        StaticListingSource::new().with_ids(ContentType::Movie, vec![1, 2, 2]),
    ));
    let cancel = CancellationToken::new();

    let first = coordinator
        .sync(ContentType::Movie, SyncOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(first.seeded.inserted, 2);
    assert_eq!(first.run.completed, 2);

    let second = coordinator
        .sync(ContentType::Movie, SyncOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(second.seeded.inserted, 0);
    assert_eq!(second.seeded.already_tracked, 2);
    assert_eq!(second.run.attempted, 0);
    assert_eq!(second.run.passes, 0);
    assert_eq!(h.catalog.calls(), 2);
}

#[tokio::test]
async fn listing_failure_still_drains_tracked_items() {
    let catalog =
        ScriptedCatalog::default().with_record(ContentType::Movie, 1, movie(1, "One"));
    let h = harness(catalog, config(3));
    h.coordinator.seed(ContentType::Movie, &[1]).await.unwrap();
    let coordinator = h.coordinator.clone().with_listing(Arc::new(BrokenListing));

    let summary = coordinator
        .sync(ContentType::Movie, SyncOptions::default(), &CancellationToken::new())
        .await
        .expect("listing failure is not fatal");

    assert_eq!(summary.listed, None);
    assert_eq!(summary.run.completed, 1);
}

#[tokio::test]
async fn cancelled_run_dispatches_nothing() {
    let catalog =
        ScriptedCatalog::default().with_record(ContentType::Movie, 1, movie(1, "One"));
    let h = harness(catalog, config(3));
    h.coordinator.seed(ContentType::Movie, &[1]).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = h
        .coordinator
        .sync(ContentType::Movie, SyncOptions { skip_listing: true }, &cancel)
        .await
        .unwrap();

    assert_eq!(summary.run.attempted, 0);
    assert_eq!(summary.status.pending, 1);
    assert_eq!(h.catalog.calls(), 0);
}

#[tokio::test]
async fn retry_failed_and_refresh_requeue_items() {
    let catalog = ScriptedCatalog::default()
        .with_record(ContentType::Movie, 1, movie(1, "One"))
        .script(
            ContentType::Movie,
            2,
            vec![Err(FetchError::Permanent("HTTP 401".into()))],
        )
        .with_record(ContentType::Movie, 2, movie(2, "Two"));
    let h = harness(
        catalog,
        EngineConfig {
            refresh_after_days: 0,
            ..config(1)
        },
    );
    h.coordinator.seed(ContentType::Movie, &[1, 2]).await.unwrap();
    let options = SyncOptions { skip_listing: true };
    let cancel = CancellationToken::new();

    let first = h.coordinator.sync(ContentType::Movie, options, &cancel).await.unwrap();
    assert_eq!(first.status.completed, 1);
    assert_eq!(first.status.failed_terminal, 1);

    assert_eq!(h.coordinator.retry_failed(Some(ContentType::Movie)).await.unwrap(), 1);
    let second = h.coordinator.sync(ContentType::Movie, options, &cancel).await.unwrap();
    assert_eq!(second.status.completed, 2);
    assert_eq!(h.catalog.calls(), 3);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let scheduled = h
        .coordinator
        .refresh_stale(ContentType::Movie, 100)
        .await
        .unwrap();
    assert_eq!(scheduled, 2);
    let third = h.coordinator.sync(ContentType::Movie, options, &cancel).await.unwrap();
    assert_eq!(third.run.completed, 2);
    assert_eq!(h.catalog.calls(), 5);
}

#[tokio::test]
async fn store_only_coordinator_seeds_and_requeues_but_cannot_sync() {
    let state = Arc::new(InMemoryStateStore::new());
    let coordinator = RunCoordinator::without_client(
        state.clone(),
        Arc::new(InMemoryCatalogWriter::new()),
        config(1),
    )
    .with_listing(Arc::new(
        StaticListingSource::new().with_ids(ContentType::Movie, vec![550]),
    ));

    let seeded = coordinator.seed(ContentType::Movie, &[550, 680]).await.unwrap();
    assert_eq!(seeded.inserted, 2);

    let policy = EligibilityPolicy::new(1, Duration::from_secs(3600));
    let lease = state
        .mark_in_progress(ContentType::Movie, 680, &policy)
        .await
        .unwrap();
    let failure = FailureRecord::new(FailureKind::Permanent, "HTTP 401");
    state.mark_failed(&lease, &failure, 1).await.unwrap();
    assert_eq!(coordinator.retry_failed(None).await.unwrap(), 1);

    let err = coordinator
        .sync(ContentType::Movie, SyncOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Config(_)));

    let untouched = state.get(ContentType::Movie, 550).await.unwrap().unwrap();
    assert_eq!(untouched.status, ProcessingStatus::Pending);
    let requeued = state.get(ContentType::Movie, 680).await.unwrap().unwrap();
    assert_eq!(requeued.status, ProcessingStatus::Pending);
}
