use cinesync_model::ContentType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{content_type}:{external_id} is already leased")]
    AlreadyLeased {
        content_type: ContentType,
        external_id: i64,
    },

    #[error("{content_type}:{external_id} is not tracked")]
    NotTracked {
        content_type: ContentType,
        external_id: i64,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("State store error: {0}")]
    StateStore(String),

    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::StateStore(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Longest error message stored on a `processing_state` row.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Clamp an error message to [`MAX_ERROR_MESSAGE_CHARS`] on a char boundary.
pub fn truncate_error_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_ERROR_MESSAGE_CHARS + 10);
        let clamped = truncate_error_message(&long);
        assert_eq!(clamped.chars().count(), MAX_ERROR_MESSAGE_CHARS);

        assert_eq!(truncate_error_message("short"), "short");
    }
}
