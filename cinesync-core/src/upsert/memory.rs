use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinesync_model::ContentType;
use serde_json::Value;

use super::{
    CatalogWriter,
    normalize::{NormalizedMovie, NormalizedPerson, NormalizedRecord, NormalizedSeries, normalize},
};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Stored {
    record: NormalizedRecord,
    updated_at: DateTime<Utc>,
}

/// Keeps the latest normalized row set per entity. Each apply replaces the
/// whole set, mirroring the delete-then-insert semantics of the SQL writer.
#[derive(Clone, Default)]
pub struct InMemoryCatalogWriter {
    entities: Arc<tokio::sync::Mutex<HashMap<(ContentType, i64), Stored>>>,
}

impl fmt::Debug for InMemoryCatalogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryCatalogWriter");
        match self.entities.try_lock() {
            Ok(entities) => {
                debug.field("entities", &entities.len());
            }
            Err(_) => {
                debug.field("entities", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryCatalogWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> Option<NormalizedRecord> {
        self.entities
            .lock()
            .await
            .get(&(content_type, external_id))
            .map(|stored| stored.record.clone())
    }

    pub async fn movie(&self, external_id: i64) -> Option<NormalizedMovie> {
        match self.record(ContentType::Movie, external_id).await? {
            NormalizedRecord::Movie(movie) => Some(movie),
            _ => None,
        }
    }

    pub async fn series(&self, external_id: i64) -> Option<NormalizedSeries> {
        match self.record(ContentType::TvSeries, external_id).await? {
            NormalizedRecord::Series(series) => Some(series),
            _ => None,
        }
    }

    pub async fn person(&self, external_id: i64) -> Option<NormalizedPerson> {
        match self.record(ContentType::Person, external_id).await? {
            NormalizedRecord::Person(person) => Some(person),
            _ => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.entities.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.lock().await.is_empty()
    }
}

#[async_trait]
impl CatalogWriter for InMemoryCatalogWriter {
    async fn apply(
        &self,
        content_type: ContentType,
        external_id: i64,
        raw: &Value,
    ) -> Result<()> {
        let record = normalize(content_type, external_id, raw)?;
        self.entities.lock().await.insert(
            (content_type, external_id),
            Stored {
                record,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn stale_ids(
        &self,
        content_type: ContentType,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let entities = self.entities.lock().await;
        let mut stale: Vec<(DateTime<Utc>, i64)> = entities
            .iter()
            .filter(|((ct, _), stored)| {
                *ct == content_type && stored.updated_at < older_than
            })
            .map(|((_, id), stored)| (stored.updated_at, *id))
            .collect();
        stale.sort();
        Ok(stale.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reapply_replaces_association_sets() {
        let writer = InMemoryCatalogWriter::new();
        writer
            .apply(
                ContentType::Movie,
                550,
                &json!({"id": 550, "title": "Fight Club", "genres": [
                    {"id": 18, "name": "Drama"}, {"id": 53, "name": "Thriller"}
                ]}),
            )
            .await
            .expect("first apply");
        writer
            .apply(
                ContentType::Movie,
                550,
                &json!({"id": 550, "title": "Fight Club", "genres": [
                    {"id": 35, "name": "Comedy"}
                ]}),
            )
            .await
            .expect("second apply");

        let movie = writer.movie(550).await.expect("stored");
        let genres: Vec<i64> = movie.genres.iter().map(|g| g.id).collect();
        assert_eq!(genres, vec![35]);
        assert_eq!(writer.len().await, 1);
    }

    #[tokio::test]
    async fn invalid_records_are_not_stored() {
        let writer = InMemoryCatalogWriter::new();
        let err = writer
            .apply(ContentType::Movie, 550, &json!({"id": 550}))
            .await
            .expect_err("missing title");
        assert!(matches!(err, crate::error::IngestError::Validation(_)));
        assert!(writer.is_empty().await);
    }

    #[tokio::test]
    async fn stale_ids_respect_cutoff() {
        let writer = InMemoryCatalogWriter::new();
        writer
            .apply(ContentType::Person, 287, &json!({"id": 287, "name": "Brad Pitt"}))
            .await
            .expect("apply");

        let past = Utc::now() - chrono::Duration::days(1);
        let future = Utc::now() + chrono::Duration::days(1);
        assert!(writer.stale_ids(ContentType::Person, past, 10).await.expect("stale").is_empty());
        assert_eq!(
            writer.stale_ids(ContentType::Person, future, 10).await.expect("stale"),
            vec![287]
        );
        assert!(writer.stale_ids(ContentType::Movie, future, 10).await.expect("stale").is_empty());
    }
}
