use chrono::{DateTime, Utc};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::{content_type::ContentType, error::ModelError};

/// Lifecycle of one tracked catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ProcessingStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::InProgress => "in_progress",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "in_progress" => Ok(ProcessingStatus::InProgress),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Classification of the last failed attempt, persisted beside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailureKind {
    /// Upstream no longer knows the id.
    NotFound,
    /// Network or timeout failure; retried.
    Transient,
    /// Validation or schema mismatch; retried but surfaced to operators.
    Permanent,
    /// Upsert transaction failed and was rolled back.
    Persistence,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
            FailureKind::Persistence => "persistence",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(FailureKind::NotFound),
            "transient" => Ok(FailureKind::Transient),
            "permanent" => Ok(FailureKind::Permanent),
            "persistence" => Ok(FailureKind::Persistence),
            other => Err(ModelError::UnknownFailureKind(other.to_string())),
        }
    }
}

/// One `processing_state` row.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessingState {
    pub content_type: ContentType,
    pub external_id: i64,
    pub status: ProcessingStatus,
    pub retry_count: u32,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingState {
    pub fn pending(content_type: ContentType, external_id: i64) -> Self {
        Self {
            content_type,
            external_id,
            status: ProcessingStatus::Pending,
            retry_count: 0,
            error_kind: None,
            error_message: None,
            last_attempt_at: None,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// A failed item that has exhausted its retry ceiling.
    pub fn is_terminal(&self, max_retries: u32) -> bool {
        self.status == ProcessingStatus::Failed
            && self.retry_count >= max_retries
    }
}
