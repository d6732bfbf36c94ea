//! IndexedDB storage engine for idbkit (browser WASM)
//!
//! Implements the `idbkit_core::StorageEngine` contract over the browser's
//! IndexedDB through web-sys, so `idbkit_core::Database` can run unchanged in
//! the browser. Records cross into JS as JSON; DOMException names come back as
//! `EngineErrorKind`s.
//!
//! # Example
//!
//! ```rust,ignore
//! use idbkit_core::{Database, DatabaseSchema, InitOptions, StoreOptions, StoreSchema};
//! use idbkit_indexeddb::IndexedDbEngine;
//! use serde_json::json;
//!
//! let schema = DatabaseSchema::new("pis", 1)
//!     .store(StoreSchema::new("test").options(StoreOptions::key_path("name")));
//! let db = Database::new(IndexedDbEngine::new(), schema);
//! db.initialize(InitOptions::default()).await?;
//!
//! db.put("test", json!({ "name": "a", "v": 1 }), None).await?;
//! let retrieved = db.get("test", "a").await?;
//! assert!(retrieved.is_some());
//! ```

pub mod convert;
pub mod engine;
pub mod error;
pub mod idb;
mod upgrade;

pub use engine::IndexedDbEngine;
pub use error::{IndexedDbError, Result};
