//! Error types for the IndexedDB engine

use idbkit_core::{EngineError, EngineErrorKind};
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::DomException;

/// Result type for IndexedDB operations
pub type Result<T> = std::result::Result<T, IndexedDbError>;

/// Errors that can occur while talking to IndexedDB
#[derive(Debug, Error)]
pub enum IndexedDbError {
    /// IndexedDB is not available in this environment
    #[error("IndexedDB not available: {0}")]
    NotAvailable(String),

    /// A `DOMException` raised by a request, a transaction or a synchronous call
    #[error("{name}: {message}")]
    Dom { name: String, message: String },

    /// The upgrade routine failed and the upgrade transaction was aborted
    #[error("upgrade aborted: {0}")]
    Upgrade(EngineError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JavaScript value conversion error
    #[error("JS conversion error: {0}")]
    JsValue(String),
}

impl IndexedDbError {
    pub(crate) fn dom(name: &str, message: impl Into<String>) -> Self {
        IndexedDbError::Dom {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

impl From<DomException> for IndexedDbError {
    fn from(err: DomException) -> Self {
        IndexedDbError::Dom {
            name: err.name(),
            message: err.message(),
        }
    }
}

impl From<JsValue> for IndexedDbError {
    fn from(val: JsValue) -> Self {
        if let Some(err) = val.dyn_ref::<DomException>() {
            return err.clone().into();
        }
        if let Some(err) = val.dyn_ref::<js_sys::Error>() {
            return IndexedDbError::Dom {
                name: String::from(err.name()),
                message: String::from(err.message()),
            };
        }
        let msg = js_sys::JSON::stringify(&val)
            .map(String::from)
            .unwrap_or_else(|_| format!("{:?}", val));
        IndexedDbError::JsValue(msg)
    }
}

/// Convert IndexedDbError to EngineError for the storage engine trait
impl From<IndexedDbError> for EngineError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::Dom { name, message } => {
                EngineError::new(EngineErrorKind::from_name(&name), message)
            }
            IndexedDbError::Upgrade(err) => err,
            IndexedDbError::NotAvailable(msg) => {
                EngineError::new(EngineErrorKind::Other("NotSupportedError".into()), msg)
            }
            IndexedDbError::Json(e) => EngineError::data(e.to_string()),
            IndexedDbError::JsValue(msg) => EngineError::data(msg),
        }
    }
}
