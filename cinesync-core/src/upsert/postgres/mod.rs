use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinesync_model::ContentType;
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use super::{
    CatalogWriter,
    normalize::{NormalizedRecord, normalize},
};
use crate::error::{IngestError, Result};

mod movie;
mod person;
mod series;
mod shared;

use shared::persistence;

/// Writes normalized records into the catalog tables, one transaction per
/// item. Associations are replaced (delete then insert) so a re-fetch never
/// leaves links the upstream record dropped.
#[derive(Clone)]
pub struct PostgresCatalogWriter {
    pool: PgPool,
}

impl fmt::Debug for PostgresCatalogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCatalogWriter")
            .field("pool_size", &self.pool.size())
            .field("pool_idle", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresCatalogWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn entity_table(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Movie => "movies",
        ContentType::TvSeries => "tv_series",
        ContentType::Person => "people",
    }
}

#[async_trait]
impl CatalogWriter for PostgresCatalogWriter {
    async fn apply(
        &self,
        content_type: ContentType,
        external_id: i64,
        raw: &Value,
    ) -> Result<()> {
        let record = normalize(content_type, external_id, raw)?;

        let mut tx = self.pool.begin().await.map_err(persistence(format!(
            "failed to begin transaction for {content_type}:{external_id}"
        )))?;

        match &record {
            NormalizedRecord::Movie(movie) => {
                movie::persist_movie(&mut tx, movie).await?
            }
            NormalizedRecord::Series(series) => {
                series::persist_series(&mut tx, series).await?
            }
            NormalizedRecord::Person(person) => {
                person::persist_person(&mut tx, person).await?
            }
        }

        tx.commit().await.map_err(persistence(format!(
            "failed to commit {content_type}:{external_id}"
        )))?;

        debug!("Upserted {content_type}:{external_id}");
        Ok(())
    }

    async fn stale_ids(
        &self,
        content_type: ContentType,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let table = entity_table(content_type);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let ids = sqlx::query_scalar::<_, i64>(&format!(
            r#"
            SELECT e.id
            FROM {table} e
            JOIN processing_state ps
              ON ps.content_type = $1
             AND ps.external_id = e.id
             AND ps.status = 'completed'
            WHERE e.updated_at < $2
            ORDER BY e.updated_at, e.id
            LIMIT $3
            "#
        ))
        .bind(content_type.as_str())
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            IngestError::Persistence(format!(
                "failed to list stale {content_type} entities: {e}"
            ))
        })?;
        Ok(ids)
    }
}
