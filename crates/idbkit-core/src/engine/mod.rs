//! Storage engine abstraction
//!
//! The [`StorageEngine`] trait is the capability the database layer consumes: a
//! named, versioned key-value engine with per-store transactions, secondary
//! indexes and upgrade notifications. Implementations exist for:
//!
//! - **Memory**: in-process engine with IndexedDB semantics (`MemoryEngine`)
//! - **IndexedDB**: browser storage via web-sys (separate crate, WASM only)
//!
//! Engines are single-threaded. Their futures are not required to be `Send`
//! because browser handles are JS objects.

mod error;
mod memory;

use serde_json::Value;

use crate::key::{Key, Query};
use crate::schema::{IndexOptions, KeyPath, StoreOptions};

pub use error::{EngineError, EngineErrorKind, EngineResult};
pub use memory::{MemoryEngine, MemoryHandle};

/// Transaction mode for a single-store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Old and new version of a database being upgraded.
///
/// `old_version` is 0 when the database is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old_version: u32,
    pub new_version: u32,
}

/// Schema operations available while an upgrade transaction is running.
pub trait UpgradeContext {
    /// Names of the stores present in the database, sorted.
    fn store_names(&self) -> Vec<String>;

    fn has_store(&self, name: &str) -> bool {
        self.store_names().iter().any(|n| n == name)
    }

    fn create_store(&mut self, name: &str, options: &StoreOptions) -> EngineResult<()>;

    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: &KeyPath,
        options: &IndexOptions,
    ) -> EngineResult<()>;
}

/// Routine run by the engine when the requested version exceeds the stored one.
///
/// Returning an error aborts the upgrade transaction and fails the open.
pub type UpgradeFn = Box<dyn FnMut(&mut dyn UpgradeContext, VersionChange) -> EngineResult<()>>;

/// A single request against one store.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// First record matching the query.
    Get(Query),
    GetAll {
        query: Option<Query>,
        count: Option<u32>,
    },
    /// Primary key of the first record matching the query.
    GetKey(Query),
    GetAllKeys {
        query: Option<Query>,
        count: Option<u32>,
    },
    Count(Option<Query>),
    /// Insert; fails with `ConstraintError` if the key exists.
    Add {
        value: Value,
        key: Option<Key>,
    },
    /// Insert or overwrite.
    Put {
        value: Value,
        key: Option<Key>,
    },
    Delete(Query),
    Clear,
    IndexGetAll {
        index: String,
        query: Option<Query>,
        count: Option<u32>,
    },
    IndexCount {
        index: String,
        query: Option<Query>,
    },
    /// Walk a key cursor over the index entries matching the query and delete
    /// each record by primary key.
    IndexDelete {
        index: String,
        query: Query,
    },
}

impl Request {
    pub fn mode(&self) -> TransactionMode {
        match self {
            Request::Add { .. }
            | Request::Put { .. }
            | Request::Delete(_)
            | Request::Clear
            | Request::IndexDelete { .. } => TransactionMode::ReadWrite,
            _ => TransactionMode::ReadOnly,
        }
    }

    /// Short engine-level name, as used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Get(_) => "get",
            Request::GetAll { .. } => "getAll",
            Request::GetKey(_) => "getKey",
            Request::GetAllKeys { .. } => "getAllKeys",
            Request::Count(_) => "count",
            Request::Add { .. } => "add",
            Request::Put { .. } => "put",
            Request::Delete(_) => "delete",
            Request::Clear => "clear",
            Request::IndexGetAll { .. } => "index.getAll",
            Request::IndexCount { .. } => "index.count",
            Request::IndexDelete { .. } => "index.openKeyCursor",
        }
    }
}

/// Engine result for a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Record(Option<Value>),
    Records(Vec<Value>),
    Key(Option<Key>),
    Keys(Vec<Key>),
    Count(u64),
    Done,
    Deleted(u64),
}

impl Response {
    fn kind(&self) -> &'static str {
        match self {
            Response::Record(_) => "record",
            Response::Records(_) => "records",
            Response::Key(_) => "key",
            Response::Keys(_) => "keys",
            Response::Count(_) => "count",
            Response::Done => "done",
            Response::Deleted(_) => "deleted",
        }
    }

    fn mismatch(self, expected: &str) -> EngineError {
        EngineError::unknown(format!(
            "expected {} response, engine returned {}",
            expected,
            self.kind()
        ))
    }

    pub fn into_record(self) -> EngineResult<Option<Value>> {
        match self {
            Response::Record(record) => Ok(record),
            other => Err(other.mismatch("record")),
        }
    }

    pub fn into_records(self) -> EngineResult<Vec<Value>> {
        match self {
            Response::Records(records) => Ok(records),
            other => Err(other.mismatch("records")),
        }
    }

    pub fn into_key(self) -> EngineResult<Option<Key>> {
        match self {
            Response::Key(key) => Ok(key),
            other => Err(other.mismatch("key")),
        }
    }

    pub fn into_keys(self) -> EngineResult<Vec<Key>> {
        match self {
            Response::Keys(keys) => Ok(keys),
            other => Err(other.mismatch("keys")),
        }
    }

    pub fn into_count(self) -> EngineResult<u64> {
        match self {
            Response::Count(n) | Response::Deleted(n) => Ok(n),
            other => Err(other.mismatch("count")),
        }
    }

    pub fn into_done(self) -> EngineResult<()> {
        match self {
            Response::Done => Ok(()),
            other => Err(other.mismatch("done")),
        }
    }
}

/// An embedded key-value storage engine.
///
/// Every call settles exactly once. `open` must only resolve after the upgrade
/// transaction (if any) has completed.
#[allow(async_fn_in_trait)]
pub trait StorageEngine {
    /// Live connection to an open database.
    type Handle: Clone;

    /// Open `name` at `version`, running `upgrade` first if the stored version is
    /// lower (or the database does not exist yet).
    async fn open(&self, name: &str, version: u32, upgrade: UpgradeFn)
        -> EngineResult<Self::Handle>;

    /// Run one request in a transaction scoped to `store`.
    async fn execute(
        &self,
        handle: &Self::Handle,
        store: &str,
        mode: TransactionMode,
        request: Request,
    ) -> EngineResult<Response>;

    /// Close a connection. Requests on a closed handle fail with `InvalidStateError`.
    async fn close(&self, handle: &Self::Handle) -> EngineResult<()>;

    /// Delete a database. Deleting a database that does not exist succeeds.
    async fn delete_database(&self, name: &str) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_modes() {
        assert_eq!(
            Request::Get(Query::from("a")).mode(),
            TransactionMode::ReadOnly
        );
        assert_eq!(Request::Count(None).mode(), TransactionMode::ReadOnly);
        assert_eq!(
            Request::Put {
                value: json!({}),
                key: None
            }
            .mode(),
            TransactionMode::ReadWrite
        );
        assert_eq!(
            Request::IndexDelete {
                index: "age".into(),
                query: Query::from(3)
            }
            .mode(),
            TransactionMode::ReadWrite
        );
    }

    #[test]
    fn test_response_mismatch() {
        let err = Response::Done.into_record().unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Unknown);
        assert!(Response::Deleted(2).into_count().is_ok());
    }
}
