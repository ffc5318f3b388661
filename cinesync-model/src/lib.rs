//! Core data model definitions shared across cinesync crates.
#![allow(missing_docs)]

pub mod content_type;
pub mod error;
pub mod state;

#[cfg(feature = "serde")]
pub mod records;

pub use content_type::ContentType;
pub use error::{ModelError, Result as ModelResult};
pub use state::{FailureKind, ProcessingState, ProcessingStatus};
