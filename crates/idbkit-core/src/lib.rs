//! idbkit core
//!
//! A future-returning wrapper over an IndexedDB-style storage engine: named,
//! versioned databases made of object stores with optional secondary indexes.
//! Runs the same way in the browser (WASM, over `idbkit-indexeddb`) and natively
//! (over the in-memory engine, mainly for tests).
//!
//! # Layers
//!
//! - **Lifecycle**: open with declarative schema creation on upgrade, optional
//!   delete-and-reopen recovery, close, delete
//! - **Operations**: CRUD and index queries, one single-store transaction each,
//!   routed through one guard and one result mapping
//! - **Diagnostics**: leveled messages labelled `DB`, gated by the debug flag
//!
//! # Features
//!
//! - `subscriber` - `logging::init()` for native binaries and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use idbkit_core::{Database, DatabaseSchema, IndexSchema, InitOptions, MemoryEngine,
//!     StoreOptions, StoreSchema};
//! use serde_json::json;
//!
//! let schema = DatabaseSchema::new("pis", 1).store(
//!     StoreSchema::new("test")
//!         .options(StoreOptions::key_path("name"))
//!         .index(IndexSchema::new("age")),
//! );
//! let db = Database::new(MemoryEngine::new(), schema);
//! db.initialize(InitOptions::debug()).await?;
//!
//! db.add("test", json!({ "name": "a", "age": 3 }), None).await?;
//! let found = db.get_index("test", "age", 3).await?;
//! assert_eq!(found.len(), 1);
//! ```

pub mod config;
pub mod database;
pub mod diag;
pub mod engine;
pub mod error;
pub mod key;
pub mod lifecycle;
#[cfg(feature = "subscriber")]
pub mod logging;
pub mod schema;
pub mod table;

// Re-export main types at crate root
pub use config::{InitOptions, Recovery};
pub use database::{Database, Stored};
pub use diag::{DiagnosticSink, Level, TracingSink, LABEL};
pub use engine::{
    EngineError, EngineErrorKind, EngineResult, MemoryEngine, MemoryHandle, Request, Response,
    StorageEngine, TransactionMode, UpgradeContext, UpgradeFn, VersionChange,
};
pub use error::{Error, Result};
pub use key::{Key, KeyRange, Query};
pub use lifecycle::{apply_schema, State};
pub use schema::{DatabaseSchema, IndexOptions, IndexSchema, KeyPath, StoreOptions, StoreSchema};
pub use table::Table;
