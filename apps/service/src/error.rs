use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::monitoring::validation::DestinationError;

/// Errors surfaced to callers of the engine's host and metric operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid destination '{destination}': {reason}")]
    InvalidDestination {
        destination: String,
        #[source]
        reason: DestinationError,
    },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    #[error("Category name must not be empty")]
    EmptyCategoryName,

    #[error("Category '{0}' is the default category and cannot be removed")]
    ProtectedCategory(String),

    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidRange { start: DateTime<Utc>, end: DateTime<Utc> },

    #[error("{0:#}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn host_not_found(destination: &str) -> Self {
        Self::NotFound { entity: "Host", key: destination.to_string() }
    }

    pub fn category_not_found(name: &str) -> Self {
        Self::NotFound { entity: "Category", key: name.to_string() }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
