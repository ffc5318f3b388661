use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinesync_model::{ContentType, FailureKind, ProcessingState, ProcessingStatus};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{debug, info};

use super::{
    EligibilityPolicy, FailureDisposition, FailureRecord, LeaseId, LeaseOutcome,
    LeaseToken, SeedOutcome, StateStore, StatusSummary, unique_ids,
};
use crate::error::{IngestError, Result, truncate_error_message};

/// Ids per seeding statement; keeps one `UNNEST` bind well under protocol limits.
const SEED_CHUNK: usize = 10_000;

const STATE_COLUMNS: &str = r#"
    content_type, external_id, status, retry_count, error_kind,
    error_message, last_attempt_at, completed_at, updated_at
"#;

/// `processing_state` backed by Postgres. Leases are conditional
/// `UPDATE ... RETURNING` statements, so concurrent claimers are arbitrated
/// by the row lock.
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresStateStore")
            .field("pool_size", &self.pool.size())
            .field("pool_idle", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the store after checking connectivity and that migrations ran.
    pub async fn connect_verified(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                IngestError::StateStore(format!(
                    "state store failed Postgres health check: {e}"
                ))
            })?;

        let table_exists = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT 1
            FROM information_schema.tables
            WHERE table_name = 'processing_state'
            LIMIT 1
            "#,
        )
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            IngestError::StateStore(format!(
                "state store schema validation failed: {e}"
            ))
        })?
        .is_some();

        if !table_exists {
            return Err(IngestError::StateStore(
                "table processing_state is missing; run `cinesync migrate`".into(),
            ));
        }

        info!("state store connected to Postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn state_from_row(row: &PgRow) -> Result<ProcessingState> {
    let content_type: String = row.try_get("content_type")?;
    let status: String = row.try_get("status")?;
    let error_kind: Option<String> = row.try_get("error_kind")?;

    Ok(ProcessingState {
        content_type: content_type
            .parse()
            .map_err(|e| IngestError::StateStore(format!("{e}")))?,
        external_id: row.try_get("external_id")?,
        status: status
            .parse::<ProcessingStatus>()
            .map_err(|e| IngestError::StateStore(format!("{e}")))?,
        retry_count: to_u32(row.try_get("retry_count")?),
        error_kind: error_kind
            .map(|kind| kind.parse::<FailureKind>())
            .transpose()
            .map_err(|e| IngestError::StateStore(format!("{e}")))?,
        error_message: row.try_get("error_message")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        completed_at: row.try_get("completed_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn lease_outcome(rows_affected: u64) -> LeaseOutcome {
    if rows_affected == 0 {
        LeaseOutcome::LeaseLost
    } else {
        LeaseOutcome::Applied
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn seed(
        &self,
        content_type: ContentType,
        external_ids: &[i64],
    ) -> Result<SeedOutcome> {
        let ids = unique_ids(external_ids);
        let mut inserted = 0u64;

        for chunk in ids.chunks(SEED_CHUNK) {
            let result = sqlx::query(
                r#"
                INSERT INTO processing_state (content_type, external_id)
                SELECT $1, id FROM UNNEST($2::BIGINT[]) AS seeded(id)
                ON CONFLICT (content_type, external_id) DO NOTHING
                "#,
            )
            .bind(content_type.as_str())
            .bind(chunk)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IngestError::StateStore(format!("seeding {content_type} failed: {e}"))
            })?;
            inserted += result.rows_affected();
        }

        let outcome = SeedOutcome {
            inserted,
            already_tracked: ids.len() as u64 - inserted,
        };
        debug!(
            content_type = %content_type,
            inserted = outcome.inserted,
            already_tracked = outcome.already_tracked,
            "seeded processing state"
        );
        Ok(outcome)
    }

    async fn mark_in_progress(
        &self,
        content_type: ContentType,
        external_id: i64,
        policy: &EligibilityPolicy,
    ) -> Result<LeaseToken> {
        let lease_id = LeaseId::new();

        let claimed = sqlx::query(
            r#"
            UPDATE processing_state
            SET status = 'in_progress',
                lease_id = $3,
                last_attempt_at = NOW(),
                updated_at = NOW()
            WHERE content_type = $1
              AND external_id = $2
              AND (
                    status = 'pending'
                 OR (status = 'failed' AND retry_count < $4)
                 OR (status = 'in_progress'
                     AND (last_attempt_at IS NULL
                          OR last_attempt_at < NOW() - make_interval(secs => $5)))
              )
            RETURNING retry_count, last_attempt_at
            "#,
        )
        .bind(content_type.as_str())
        .bind(external_id)
        .bind(lease_id.0)
        .bind(to_i32(policy.max_retries))
        .bind(policy.liveness_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("lease claim failed: {e}")))?;

        if let Some(row) = claimed {
            let acquired_at: Option<DateTime<Utc>> = row.try_get("last_attempt_at")?;
            return Ok(LeaseToken {
                content_type,
                external_id,
                lease_id,
                retry_count: to_u32(row.try_get("retry_count")?),
                acquired_at: acquired_at.unwrap_or_else(Utc::now),
            });
        }

        let tracked = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM processing_state WHERE content_type = $1 AND external_id = $2",
        )
        .bind(content_type.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("lease lookup failed: {e}")))?;

        Err(match tracked {
            Some(_) => IngestError::AlreadyLeased {
                content_type,
                external_id,
            },
            None => IngestError::NotTracked {
                content_type,
                external_id,
            },
        })
    }

    async fn mark_completed(&self, lease: &LeaseToken) -> Result<LeaseOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE processing_state
            SET status = 'completed',
                completed_at = NOW(),
                error_kind = NULL,
                error_message = NULL,
                lease_id = NULL,
                updated_at = NOW()
            WHERE content_type = $1
              AND external_id = $2
              AND status = 'in_progress'
              AND lease_id = $3
            "#,
        )
        .bind(lease.content_type.as_str())
        .bind(lease.external_id)
        .bind(lease.lease_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("mark completed failed: {e}")))?;

        Ok(lease_outcome(result.rows_affected()))
    }

    async fn mark_failed(
        &self,
        lease: &LeaseToken,
        failure: &FailureRecord,
        max_retries: u32,
    ) -> Result<FailureDisposition> {
        let retry_count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE processing_state
            SET status = 'failed',
                retry_count = LEAST(retry_count + 1, $4),
                error_kind = $5,
                error_message = $6,
                lease_id = NULL,
                last_attempt_at = NOW(),
                updated_at = NOW()
            WHERE content_type = $1
              AND external_id = $2
              AND status = 'in_progress'
              AND lease_id = $3
            RETURNING retry_count
            "#,
        )
        .bind(lease.content_type.as_str())
        .bind(lease.external_id)
        .bind(lease.lease_id.0)
        .bind(to_i32(max_retries))
        .bind(failure.kind.as_str())
        .bind(truncate_error_message(&failure.message))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("mark failed failed: {e}")))?;

        Ok(match retry_count {
            Some(count) => FailureDisposition::from_count(to_u32(count), max_retries),
            None => FailureDisposition::LeaseLost,
        })
    }

    async fn mark_terminal(
        &self,
        lease: &LeaseToken,
        failure: &FailureRecord,
        max_retries: u32,
    ) -> Result<FailureDisposition> {
        let retry_count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE processing_state
            SET status = 'failed',
                retry_count = GREATEST(retry_count, $4),
                error_kind = $5,
                error_message = $6,
                lease_id = NULL,
                last_attempt_at = NOW(),
                updated_at = NOW()
            WHERE content_type = $1
              AND external_id = $2
              AND status = 'in_progress'
              AND lease_id = $3
            RETURNING retry_count
            "#,
        )
        .bind(lease.content_type.as_str())
        .bind(lease.external_id)
        .bind(lease.lease_id.0)
        .bind(to_i32(max_retries))
        .bind(failure.kind.as_str())
        .bind(truncate_error_message(&failure.message))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("mark terminal failed: {e}")))?;

        Ok(match retry_count {
            Some(count) => FailureDisposition::Terminal {
                retry_count: to_u32(count),
            },
            None => FailureDisposition::LeaseLost,
        })
    }

    async fn release(&self, lease: &LeaseToken) -> Result<LeaseOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE processing_state
            SET status = CASE WHEN retry_count > 0 THEN 'failed' ELSE 'pending' END,
                lease_id = NULL,
                updated_at = NOW()
            WHERE content_type = $1
              AND external_id = $2
              AND status = 'in_progress'
              AND lease_id = $3
            "#,
        )
        .bind(lease.content_type.as_str())
        .bind(lease.external_id)
        .bind(lease.lease_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("lease release failed: {e}")))?;

        Ok(lease_outcome(result.rows_affected()))
    }

    async fn select_eligible(
        &self,
        content_type: ContentType,
        limit: usize,
        policy: &EligibilityPolicy,
    ) -> Result<Vec<i64>> {
        // One branch per partial index; the outer sort only sees `3 * limit` rows.
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT external_id FROM (
                (SELECT external_id, 0 AS tier, last_attempt_at
                   FROM processing_state
                  WHERE content_type = $1 AND status = 'pending'
                  ORDER BY last_attempt_at ASC NULLS FIRST, external_id
                  LIMIT $4)
                UNION ALL
                (SELECT external_id, 1 AS tier, last_attempt_at
                   FROM processing_state
                  WHERE content_type = $1 AND status = 'failed' AND retry_count < $2
                  ORDER BY last_attempt_at ASC NULLS FIRST, external_id
                  LIMIT $4)
                UNION ALL
                (SELECT external_id, 2 AS tier, last_attempt_at
                   FROM processing_state
                  WHERE content_type = $1
                    AND status = 'in_progress'
                    AND (last_attempt_at IS NULL
                         OR last_attempt_at < NOW() - make_interval(secs => $3))
                  ORDER BY last_attempt_at ASC NULLS FIRST, external_id
                  LIMIT $4)
            ) AS eligible
            ORDER BY tier, last_attempt_at ASC NULLS FIRST, external_id
            LIMIT $4
            "#,
        )
        .bind(content_type.as_str())
        .bind(to_i32(policy.max_retries))
        .bind(policy.liveness_timeout.as_secs_f64())
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("eligibility query failed: {e}")))?;

        Ok(ids)
    }

    async fn get(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> Result<Option<ProcessingState>> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM processing_state \
             WHERE content_type = $1 AND external_id = $2"
        ))
        .bind(content_type.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(state_from_row).transpose()
    }

    async fn summarize(
        &self,
        content_type: ContentType,
        max_retries: u32,
    ) -> Result<StatusSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed' AND retry_count < $2) AS failed_retryable,
                COUNT(*) FILTER (WHERE status = 'failed' AND retry_count >= $2) AS failed_terminal
            FROM processing_state
            WHERE content_type = $1
            "#,
        )
        .bind(content_type.as_str())
        .bind(to_i32(max_retries))
        .fetch_one(&self.pool)
        .await?;

        let count = |column: &str| -> Result<u64> {
            let value: i64 = row.try_get(column)?;
            Ok(value.max(0) as u64)
        };

        Ok(StatusSummary {
            pending: count("pending")?,
            in_progress: count("in_progress")?,
            completed: count("completed")?,
            failed_retryable: count("failed_retryable")?,
            failed_terminal: count("failed_terminal")?,
        })
    }

    async fn terminal_failures(
        &self,
        content_type: ContentType,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<ProcessingState>> {
        let rows = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM processing_state \
             WHERE content_type = $1 AND status = 'failed' AND retry_count >= $2 \
             ORDER BY last_attempt_at DESC NULLS LAST, external_id \
             LIMIT $3"
        ))
        .bind(content_type.as_str())
        .bind(to_i32(max_retries))
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(state_from_row).collect()
    }

    async fn reset_failed(&self, content_type: Option<ContentType>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE processing_state
            SET status = 'pending',
                retry_count = 0,
                error_kind = NULL,
                error_message = NULL,
                updated_at = NOW()
            WHERE status = 'failed'
              AND ($1::TEXT IS NULL OR content_type = $1)
            "#,
        )
        .bind(content_type.map(ContentType::as_str))
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::StateStore(format!("reset failed items failed: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn schedule_refresh(
        &self,
        content_type: ContentType,
        external_ids: &[i64],
    ) -> Result<u64> {
        let ids = unique_ids(external_ids);
        let mut scheduled = 0u64;

        for chunk in ids.chunks(SEED_CHUNK) {
            let result = sqlx::query(
                r#"
                UPDATE processing_state
                SET status = 'pending',
                    retry_count = 0,
                    error_kind = NULL,
                    error_message = NULL,
                    updated_at = NOW()
                WHERE content_type = $1
                  AND external_id = ANY($2)
                  AND status <> 'in_progress'
                "#,
            )
            .bind(content_type.as_str())
            .bind(chunk)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IngestError::StateStore(format!("refresh scheduling failed: {e}"))
            })?;
            scheduled += result.rows_affected();
        }

        Ok(scheduled)
    }
}
