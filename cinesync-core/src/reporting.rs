//! Read-only aggregate queries over ingested data.
//!
//! Entity queries join `processing_state` on `completed` so that only fully
//! upserted entities are reported.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use cinesync_model::ContentType;
use serde::Serialize;
use sqlx::{FromRow, PgPool};

use crate::error::{IngestError, Result};
use crate::state::StatusSummary;

#[derive(Debug, Clone, Serialize)]
pub struct ContentStatus {
    pub content_type: ContentType,
    pub summary: StatusSummary,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TopRatedTitle {
    pub id: i64,
    pub title: String,
    pub vote_average: f64,
    pub vote_count: i64,
    pub popularity: f64,
    pub released: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProlificPerson {
    pub person_id: i64,
    pub name: String,
    pub known_for_department: Option<String>,
    pub movie_credits: i64,
    pub series_credits: i64,
    pub total_credits: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CompletionBucket {
    pub hour: DateTime<Utc>,
    pub content_type: String,
    pub completed: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FailureBreakdown {
    pub content_type: String,
    pub error_kind: Option<String>,
    pub terminal: bool,
    pub items: i64,
}

#[derive(Clone)]
pub struct ReportingRepository {
    pool: PgPool,
}

impl fmt::Debug for ReportingRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportingRepository")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

fn report_error(what: &str) -> impl FnOnce(sqlx::Error) -> IngestError + '_ {
    move |e| IngestError::StateStore(format!("{what} query failed: {e}"))
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl ReportingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Status counts for every content type, including ones with no rows.
    pub async fn status_counts(&self, max_retries: u32) -> Result<Vec<ContentStatus>> {
        #[derive(FromRow)]
        struct Row {
            content_type: String,
            pending: i64,
            in_progress: i64,
            completed: i64,
            failed_retryable: i64,
            failed_terminal: i64,
        }

        let rows = sqlx::query_as::<_, Row>(
            r#"
            SELECT
                content_type,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed' AND retry_count < $1) AS failed_retryable,
                COUNT(*) FILTER (WHERE status = 'failed' AND retry_count >= $1) AS failed_terminal
            FROM processing_state
            GROUP BY content_type
            "#,
        )
        .bind(i32::try_from(max_retries).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(report_error("status count"))?;

        let count = |v: i64| u64::try_from(v).unwrap_or(0);
        Ok(ContentType::ALL
            .into_iter()
            .map(|content_type| {
                let summary = rows
                    .iter()
                    .find(|row| row.content_type == content_type.as_str())
                    .map(|row| StatusSummary {
                        pending: count(row.pending),
                        in_progress: count(row.in_progress),
                        completed: count(row.completed),
                        failed_retryable: count(row.failed_retryable),
                        failed_terminal: count(row.failed_terminal),
                    })
                    .unwrap_or_default();
                ContentStatus {
                    content_type,
                    summary,
                }
            })
            .collect())
    }

    pub async fn top_rated_movies(
        &self,
        min_votes: i64,
        limit: usize,
    ) -> Result<Vec<TopRatedTitle>> {
        sqlx::query_as::<_, TopRatedTitle>(
            r#"
            SELECT m.id, m.title, m.vote_average, m.vote_count, m.popularity,
                   m.release_date AS released
            FROM movies m
            JOIN processing_state ps
              ON ps.content_type = 'movie'
             AND ps.external_id = m.id
             AND ps.status = 'completed'
            WHERE m.vote_count >= $1
            ORDER BY m.vote_average DESC, m.vote_count DESC, m.id
            LIMIT $2
            "#,
        )
        .bind(min_votes)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(report_error("top rated movies"))
    }

    pub async fn top_rated_series(
        &self,
        min_votes: i64,
        limit: usize,
    ) -> Result<Vec<TopRatedTitle>> {
        sqlx::query_as::<_, TopRatedTitle>(
            r#"
            SELECT s.id, s.name AS title, s.vote_average, s.vote_count, s.popularity,
                   s.first_air_date AS released
            FROM tv_series s
            JOIN processing_state ps
              ON ps.content_type = 'tv_series'
             AND ps.external_id = s.id
             AND ps.status = 'completed'
            WHERE s.vote_count >= $1
            ORDER BY s.vote_average DESC, s.vote_count DESC, s.id
            LIMIT $2
            "#,
        )
        .bind(min_votes)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(report_error("top rated series"))
    }

    /// People credited on the most distinct completed titles (cast or crew).
    pub async fn prolific_people(&self, limit: usize) -> Result<Vec<ProlificPerson>> {
        sqlx::query_as::<_, ProlificPerson>(
            r#"
            WITH movie_credits AS (
                SELECT c.person_id, COUNT(DISTINCT c.movie_id) AS credits
                FROM (
                    SELECT person_id, movie_id FROM movie_cast
                    UNION
                    SELECT person_id, movie_id FROM movie_crew
                ) c
                JOIN processing_state ps
                  ON ps.content_type = 'movie'
                 AND ps.external_id = c.movie_id
                 AND ps.status = 'completed'
                GROUP BY c.person_id
            ),
            series_credits AS (
                SELECT c.person_id, COUNT(DISTINCT c.tv_series_id) AS credits
                FROM (
                    SELECT person_id, tv_series_id FROM tv_series_cast
                    UNION
                    SELECT person_id, tv_series_id FROM tv_series_crew
                ) c
                JOIN processing_state ps
                  ON ps.content_type = 'tv_series'
                 AND ps.external_id = c.tv_series_id
                 AND ps.status = 'completed'
                GROUP BY c.person_id
            )
            SELECT p.id AS person_id,
                   p.name,
                   p.known_for_department,
                   COALESCE(mc.credits, 0) AS movie_credits,
                   COALESCE(sc.credits, 0) AS series_credits,
                   COALESCE(mc.credits, 0) + COALESCE(sc.credits, 0) AS total_credits
            FROM people p
            LEFT JOIN movie_credits mc ON mc.person_id = p.id
            LEFT JOIN series_credits sc ON sc.person_id = p.id
            WHERE mc.credits IS NOT NULL OR sc.credits IS NOT NULL
            ORDER BY total_credits DESC, p.id
            LIMIT $1
            "#,
        )
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(report_error("prolific people"))
    }

    /// Completions per hour over the trailing window.
    pub async fn completion_timeline(&self, hours: u32) -> Result<Vec<CompletionBucket>> {
        sqlx::query_as::<_, CompletionBucket>(
            r#"
            SELECT date_trunc('hour', completed_at) AS hour,
                   content_type,
                   COUNT(*) AS completed
            FROM processing_state
            WHERE status = 'completed'
              AND completed_at >= NOW() - make_interval(hours => $1)
            GROUP BY 1, 2
            ORDER BY 1, 2
            "#,
        )
        .bind(i32::try_from(hours).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(report_error("completion timeline"))
    }

    /// Failed items grouped by kind, split into retryable and terminal.
    pub async fn failure_breakdown(&self, max_retries: u32) -> Result<Vec<FailureBreakdown>> {
        sqlx::query_as::<_, FailureBreakdown>(
            r#"
            SELECT content_type,
                   error_kind,
                   retry_count >= $1 AS terminal,
                   COUNT(*) AS items
            FROM processing_state
            WHERE status = 'failed'
            GROUP BY 1, 2, 3
            ORDER BY 1, 4 DESC
            "#,
        )
        .bind(i32::try_from(max_retries).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(report_error("failure breakdown"))
    }
}
