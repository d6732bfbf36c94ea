//! Errors reported by storage engines

use std::fmt;

use thiserror::Error;

/// Classification of an engine failure, named after the DOMException names the
/// reference engine (IndexedDB) uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Uniqueness violated: duplicate primary key, unique index, existing store.
    Constraint,
    /// Invalid key, key path or range.
    Data,
    /// Unknown store or index.
    NotFound,
    /// Operation on a closed connection or an unusable object.
    InvalidState,
    /// Requested version is lower than the stored one.
    Version,
    /// Transaction aborted.
    Abort,
    QuotaExceeded,
    Type,
    TransactionInactive,
    ReadOnly,
    Unknown,
    /// Any other name the engine reports.
    Other(String),
}

impl EngineErrorKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "ConstraintError" => EngineErrorKind::Constraint,
            "DataError" => EngineErrorKind::Data,
            "NotFoundError" => EngineErrorKind::NotFound,
            "InvalidStateError" => EngineErrorKind::InvalidState,
            "VersionError" => EngineErrorKind::Version,
            "AbortError" => EngineErrorKind::Abort,
            "QuotaExceededError" => EngineErrorKind::QuotaExceeded,
            "TypeError" => EngineErrorKind::Type,
            "TransactionInactiveError" => EngineErrorKind::TransactionInactive,
            "ReadOnlyError" => EngineErrorKind::ReadOnly,
            "UnknownError" => EngineErrorKind::Unknown,
            other => EngineErrorKind::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EngineErrorKind::Constraint => "ConstraintError",
            EngineErrorKind::Data => "DataError",
            EngineErrorKind::NotFound => "NotFoundError",
            EngineErrorKind::InvalidState => "InvalidStateError",
            EngineErrorKind::Version => "VersionError",
            EngineErrorKind::Abort => "AbortError",
            EngineErrorKind::QuotaExceeded => "QuotaExceededError",
            EngineErrorKind::Type => "TypeError",
            EngineErrorKind::TransactionInactive => "TransactionInactiveError",
            EngineErrorKind::ReadOnly => "ReadOnlyError",
            EngineErrorKind::Unknown => "UnknownError",
            EngineErrorKind::Other(name) => name,
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raw failure reported by the storage engine.
///
/// Passed through to callers unchanged; the adapter never reclassifies it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Constraint, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Data, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::NotFound, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::InvalidState, message)
    }

    pub fn version(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Version, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Unknown, message)
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }
}

/// Result type for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;
