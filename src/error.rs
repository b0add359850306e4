use thiserror::Error;

use crate::models::Category;

/// Failure to obtain a raw graph projection from the fetch collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure or an unreadable response body.
    #[error("Network error: {0}")]
    Network(String),

    /// The collaborator answered but reported a domain error.
    #[error("{message}")]
    Upstream { status: u16, message: String },
}

impl FetchError {
    pub fn not_found() -> Self {
        Self::Upstream {
            status: 404,
            message: "Student not found".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("No student ID provided")]
    MissingStudentId,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Error deriving {category}: {message}")]
    Derive { category: Category, message: String },

    #[error("No raw data available")]
    NoRawData,
}

/// Shape problems found while decoding a raw projection. Never escapes a
/// projector: callers get an empty view instead.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Data must be an array")]
    NotAnArray,

    #[error("Data array is empty")]
    Empty,

    #[error("malformed student record: {0}")]
    Decode(#[from] serde_json::Error),
}
