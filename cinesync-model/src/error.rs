use std::fmt::{self, Display};

/// Errors produced while parsing model values from their storage form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownContentType(String),
    UnknownStatus(String),
    UnknownFailureKind(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownContentType(raw) => {
                write!(f, "unknown content type: {raw}")
            }
            ModelError::UnknownStatus(raw) => {
                write!(f, "unknown processing status: {raw}")
            }
            ModelError::UnknownFailureKind(raw) => {
                write!(f, "unknown failure kind: {raw}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
