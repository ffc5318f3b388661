//! Fetched record -> normalized entity and association rows.
//!
//! `apply` is all-or-nothing per item: the entity row and every association
//! set are written in one transaction, so a `completed` state row always
//! points at a fully written entity.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinesync_model::ContentType;
use serde_json::Value;

use crate::error::Result;

pub mod memory;
pub mod normalize;
pub mod postgres;

pub use memory::InMemoryCatalogWriter;
pub use normalize::{NormalizedRecord, normalize};
pub use postgres::PostgresCatalogWriter;

#[async_trait]
pub trait CatalogWriter: Send + Sync + fmt::Debug {
    /// Upsert the entity fetched for `external_id` and replace all of its
    /// associations. Fails with `Validation` for unusable records and
    /// `Persistence` when the transaction is rolled back.
    async fn apply(
        &self,
        content_type: ContentType,
        external_id: i64,
        raw: &Value,
    ) -> Result<()>;

    /// Entities last written before `older_than`, oldest first.
    async fn stale_ids(
        &self,
        content_type: ContentType,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<i64>>;
}
