#![cfg(feature = "postgres-tests")]

use std::time::Duration;

use cinesync_core::{
    EligibilityPolicy, FailureDisposition, FailureRecord, IngestError, LeaseOutcome,
    PostgresStateStore, StateStore,
};
use cinesync_model::{ContentType, FailureKind, ProcessingStatus};
use sqlx::PgPool;

fn policy(max_retries: u32) -> EligibilityPolicy {
    EligibilityPolicy::new(max_retries, Duration::from_secs(3600))
}

async fn row_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM processing_state")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
async fn seeding_twice_is_a_no_op(pool: PgPool) {
    let store = PostgresStateStore::connect_verified(pool.clone()).await.unwrap();

    let first = store.seed(ContentType::Movie, &[550, 680, 550]).await.unwrap();
    assert_eq!(first.inserted, 2);

    let second = store.seed(ContentType::Movie, &[550, 680]).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_tracked, 2);
    assert_eq!(row_count(&pool).await, 2);

    // Same id under another content type is a different item.
    store.seed(ContentType::Person, &[550]).await.unwrap();
    assert_eq!(row_count(&pool).await, 3);
}

#[sqlx::test]
async fn reseeding_keeps_progress(pool: PgPool) {
    let store = PostgresStateStore::new(pool);
    store.seed(ContentType::Movie, &[1]).await.unwrap();
    let lease = store
        .mark_in_progress(ContentType::Movie, 1, &policy(3))
        .await
        .unwrap();
    store.mark_completed(&lease).await.unwrap();

    store.seed(ContentType::Movie, &[1]).await.unwrap();
    let state = store.get(ContentType::Movie, 1).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Completed);
}

#[sqlx::test]
async fn concurrent_claims_yield_one_lease(pool: PgPool) {
    let store = PostgresStateStore::new(pool);
    store.seed(ContentType::Movie, &[550]).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .mark_in_progress(ContentType::Movie, 550, &policy(3))
                .await
        }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(IngestError::AlreadyLeased { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(won, 1);
}

#[sqlx::test]
async fn unknown_items_are_not_tracked(pool: PgPool) {
    let store = PostgresStateStore::new(pool);
    let err = store
        .mark_in_progress(ContentType::Movie, 42, &policy(3))
        .await
        .expect_err("never seeded");
    assert!(matches!(err, IngestError::NotTracked { .. }));
}

#[sqlx::test]
async fn failures_climb_to_the_ceiling_and_leave_scheduling(pool: PgPool) {
    let store = PostgresStateStore::new(pool);
    store.seed(ContentType::Movie, &[13]).await.unwrap();
    let failure = FailureRecord::new(FailureKind::Transient, "connection reset");

    let mut counts = Vec::new();
    loop {
        let Ok(lease) = store.mark_in_progress(ContentType::Movie, 13, &policy(3)).await else {
            break;
        };
        match store.mark_failed(&lease, &failure, 3).await.unwrap() {
            FailureDisposition::Retryable { retry_count } => counts.push(retry_count),
            FailureDisposition::Terminal { retry_count } => {
                counts.push(retry_count);
            }
            FailureDisposition::LeaseLost => panic!("lease lost"),
        }
    }
    assert_eq!(counts, vec![1, 2, 3]);

    let eligible = store
        .select_eligible(ContentType::Movie, 10, &policy(3))
        .await
        .unwrap();
    assert!(eligible.is_empty());

    let terminal = store
        .terminal_failures(ContentType::Movie, 3, 10)
        .await
        .unwrap();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].error_message.as_deref(), Some("connection reset"));
    assert_eq!(terminal[0].error_kind, Some(FailureKind::Transient));

    let summary = store.summarize(ContentType::Movie, 3).await.unwrap();
    assert_eq!(summary.failed_terminal, 1);
    assert_eq!(summary.failed_retryable, 0);
}

#[sqlx::test]
async fn pending_items_come_before_retries(pool: PgPool) {
    let store = PostgresStateStore::new(pool.clone());
    store.seed(ContentType::Movie, &[1, 2, 3]).await.unwrap();

    let failure = FailureRecord::new(FailureKind::Transient, "timeout");
    let lease = store
        .mark_in_progress(ContentType::Movie, 1, &policy(3))
        .await
        .unwrap();
    store.mark_failed(&lease, &failure, 3).await.unwrap();

    let eligible = store
        .select_eligible(ContentType::Movie, 10, &policy(3))
        .await
        .unwrap();
    assert_eq!(eligible, vec![2, 3, 1]);

    let limited = store
        .select_eligible(ContentType::Movie, 1, &policy(3))
        .await
        .unwrap();
    assert_eq!(limited, vec![2]);
}

#[sqlx::test]
async fn abandoned_leases_are_reclaimed(pool: PgPool) {
    let store = PostgresStateStore::new(pool.clone());
    store.seed(ContentType::Movie, &[680]).await.unwrap();
    let stale = store
        .mark_in_progress(ContentType::Movie, 680, &policy(3))
        .await
        .unwrap();

    assert!(
        store
            .select_eligible(ContentType::Movie, 10, &policy(3))
            .await
            .unwrap()
            .is_empty()
    );

    sqlx::query(
        "UPDATE processing_state SET last_attempt_at = NOW() - INTERVAL '2 hours' \
         WHERE external_id = 680",
    )
    .execute(&pool)
    .await
    .unwrap();

    assert_eq!(
        store
            .select_eligible(ContentType::Movie, 10, &policy(3))
            .await
            .unwrap(),
        vec![680]
    );
    let fresh = store
        .mark_in_progress(ContentType::Movie, 680, &policy(3))
        .await
        .unwrap();
    assert_ne!(fresh.lease_id, stale.lease_id);

    assert_eq!(store.mark_completed(&stale).await.unwrap(), LeaseOutcome::LeaseLost);
    assert_eq!(store.mark_completed(&fresh).await.unwrap(), LeaseOutcome::Applied);

    let state = store.get(ContentType::Movie, 680).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Completed);
    assert_eq!(state.retry_count, 0);
}

#[sqlx::test]
async fn release_returns_item_without_spending_a_retry(pool: PgPool) {
    let store = PostgresStateStore::new(pool);
    store.seed(ContentType::TvSeries, &[1399]).await.unwrap();

    let lease = store
        .mark_in_progress(ContentType::TvSeries, 1399, &policy(3))
        .await
        .unwrap();
    assert_eq!(store.release(&lease).await.unwrap(), LeaseOutcome::Applied);
    let state = store.get(ContentType::TvSeries, 1399).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Pending);
    assert_eq!(state.retry_count, 0);

    let lease = store
        .mark_in_progress(ContentType::TvSeries, 1399, &policy(3))
        .await
        .unwrap();
    store
        .mark_failed(&lease, &FailureRecord::new(FailureKind::Transient, "boom"), 3)
        .await
        .unwrap();
    let lease = store
        .mark_in_progress(ContentType::TvSeries, 1399, &policy(3))
        .await
        .unwrap();
    store.release(&lease).await.unwrap();
    let state = store.get(ContentType::TvSeries, 1399).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Failed);
    assert_eq!(state.retry_count, 1);
}

#[sqlx::test]
async fn operator_overrides_requeue_items(pool: PgPool) {
    let store = PostgresStateStore::new(pool);
    store.seed(ContentType::Movie, &[1, 2]).await.unwrap();

    let lease = store
        .mark_in_progress(ContentType::Movie, 1, &policy(3))
        .await
        .unwrap();
    let disposition = store
        .mark_terminal(&lease, &FailureRecord::new(FailureKind::NotFound, "gone"), 3)
        .await
        .unwrap();
    assert_eq!(disposition, FailureDisposition::Terminal { retry_count: 3 });

    let lease = store
        .mark_in_progress(ContentType::Movie, 2, &policy(3))
        .await
        .unwrap();
    store.mark_completed(&lease).await.unwrap();

    assert_eq!(store.reset_failed(Some(ContentType::Person)).await.unwrap(), 0);
    assert_eq!(store.reset_failed(None).await.unwrap(), 1);
    let state = store.get(ContentType::Movie, 1).await.unwrap().unwrap();
    assert_eq!(state.status, ProcessingStatus::Pending);
    assert_eq!(state.retry_count, 0);
    assert_eq!(state.error_kind, None);

    assert_eq!(store.schedule_refresh(ContentType::Movie, &[2, 99]).await.unwrap(), 1);
    assert_eq!(
        store
            .select_eligible(ContentType::Movie, 10, &policy(3))
            .await
            .unwrap(),
        vec![1, 2]
    );
}
