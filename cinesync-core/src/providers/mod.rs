//! Remote catalog access.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use cinesync_model::{ContentType, FailureKind};
use serde_json::Value;
use thiserror::Error;

pub mod rate_limit;
pub mod tmdb;

pub use rate_limit::RequestPacer;
pub use tmdb::TmdbClient;

/// Why a single catalog fetch did not produce a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found in catalog")]
    NotFound,

    /// Upstream throttled us. Not the item's fault; never counted as a retry.
    #[error("rate limited by catalog")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Failure kind recorded in the state store, if the error is recorded.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            FetchError::NotFound => Some(FailureKind::NotFound),
            FetchError::RateLimited { .. } => None,
            FetchError::Transient(_) => Some(FailureKind::Transient),
            FetchError::Permanent(_) => Some(FailureKind::Permanent),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_builder() {
            FetchError::Permanent(err.to_string())
        } else {
            // Timeouts, connect/reset errors and truncated bodies are worth
            // another attempt.
            FetchError::Transient(err.to_string())
        }
    }
}

/// One raw record per `(content_type, external_id)`.
#[async_trait]
pub trait CatalogClient: Send + Sync + fmt::Debug {
    async fn fetch(
        &self,
        content_type: ContentType,
        external_id: i64,
    ) -> Result<Value, FetchError>;
}
