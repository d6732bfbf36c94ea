//! Error types for database operations

use thiserror::Error;

use crate::engine::EngineError;

/// Result type for database operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`crate::Database`] operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// No live handle: the database was never initialized, or it was closed or
    /// deleted. Carries no further detail.
    #[error("database is not open")]
    Unavailable,

    /// Raw failure reported by the storage engine
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Descriptor rejected before it reached the engine
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

impl Error {
    /// The engine error behind this failure, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Error::Engine(e) => Some(e),
            _ => None,
        }
    }
}
