//! Future-returning CRUD surface over a [`StorageEngine`].
//!
//! Every operation follows the same path through [`Database::run`]: take the
//! live handle (or fail with `Error::Unavailable`), open a transaction on one
//! store in the mode the request needs, issue exactly one engine request, then
//! map the outcome. Targeted lookups and writes propagate engine errors; count
//! and listing operations default to zero or empty unless strict aggregates are
//! enabled.

use std::rc::Rc;

use serde_json::Value;

use crate::config::InitOptions;
use crate::diag::{DiagnosticSink, Level, TracingSink};
use crate::engine::{EngineError, EngineResult, Request, Response, StorageEngine};
use crate::error::{Error, Result};
use crate::key::{Key, KeyRange, Query};
use crate::lifecycle::{Lifecycle, State};
use crate::schema::DatabaseSchema;
use crate::table::Table;

/// A record written by `add` or `put`, with the key it was stored under.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored {
    /// The record as stored, including a generated in-line key.
    pub value: Value,
    pub key: Key,
}

fn key_label(key: Option<&Key>) -> String {
    key.map_or_else(|| "(no key)".to_string(), Key::to_string)
}

fn query_label(query: Option<&Query>) -> String {
    query.map_or_else(|| "(all)".to_string(), Query::to_string)
}

/// A named, versioned database and the operations on its stores.
pub struct Database<E: StorageEngine> {
    lifecycle: Lifecycle<E>,
}

impl<E: StorageEngine> Database<E> {
    /// Create a database over `engine`. Nothing is opened until
    /// [`initialize`](Self::initialize). Diagnostics go to `tracing`.
    pub fn new(engine: E, schema: DatabaseSchema) -> Self {
        let sink: Rc<dyn DiagnosticSink> = Rc::new(TracingSink);
        Self {
            lifecycle: Lifecycle::new(engine, schema, Some(sink)),
        }
    }

    /// Send diagnostics to `sink` instead.
    pub fn with_sink(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.lifecycle.set_sink(Some(Rc::new(sink)));
        self
    }

    /// Share a sink with other databases.
    pub fn with_shared_sink(mut self, sink: Rc<dyn DiagnosticSink>) -> Self {
        self.lifecycle.set_sink(Some(sink));
        self
    }

    /// Drop diagnostics entirely, even with the debug flag on.
    pub fn without_sink(mut self) -> Self {
        self.lifecycle.set_sink(None);
        self
    }

    pub fn schema(&self) -> &DatabaseSchema {
        self.lifecycle.schema()
    }

    pub fn name(&self) -> &str {
        &self.schema().name
    }

    pub fn version(&self) -> u32 {
        self.schema().version
    }

    pub fn engine(&self) -> &E {
        self.lifecycle.engine()
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    /// Whether diagnostics are currently emitted.
    pub fn debug(&self) -> bool {
        self.lifecycle.diag().enabled()
    }

    /// View of one store with the store name fixed.
    pub fn table(&self, store: impl Into<String>) -> Table<'_, E> {
        Table::new(self, store.into())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the database, creating or upgrading its schema as needed.
    ///
    /// Re-initializing an open database closes the current connection first.
    /// With [`Recovery::DeleteAndReopen`](crate::Recovery::DeleteAndReopen), an
    /// open failure is returned right away and leaves a recovery pending; run it
    /// with [`Database::recover`] once the error has been handed on.
    pub async fn initialize(&self, options: InitOptions) -> Result<E::Handle> {
        self.lifecycle.initialize(options).await
    }

    /// Whether a failed `initialize` left a delete-and-reopen pass to run.
    pub fn recovery_pending(&self) -> bool {
        self.lifecycle.recovery_pending()
    }

    /// Run the pending delete-and-reopen pass, if any. Each failed `initialize`
    /// allows one pass; the reopen never retries.
    ///
    /// Errors here belong to the recovery only. A blocked delete keeps this
    /// future pending, so browser callers spawn it rather than await it.
    pub async fn recover(&self) -> Result<()> {
        self.lifecycle.recover().await
    }

    /// Close the live connection. Fails with `Error::Unavailable` if none is open.
    pub async fn close(&self) -> Result<()> {
        self.lifecycle.close().await
    }

    /// Delete a database by name, whatever the state of this one. Deleting this
    /// database's own name closes its connection first.
    pub async fn delete_db(&self, name: &str) -> Result<()> {
        self.lifecycle.delete_db(name).await
    }

    // ========================================================================
    // Operation adapter
    // ========================================================================

    /// Run one request against `store` and map the engine outcome.
    ///
    /// `on_success` decodes the engine response; if decoding fails the error
    /// takes the same route as an engine failure.
    async fn run<T>(
        &self,
        store: &str,
        request: Request,
        on_success: impl FnOnce(Response) -> EngineResult<T>,
        on_error: impl FnOnce(EngineError) -> Result<T>,
    ) -> Result<T> {
        let handle = self.lifecycle.handle()?;
        let mode = request.mode();
        let outcome = self
            .lifecycle
            .engine()
            .execute(&handle, store, mode, request)
            .await
            .and_then(on_success);
        match outcome {
            Ok(value) => Ok(value),
            Err(err) => on_error(err),
        }
    }

    fn emit(&self, level: Level, message: impl FnOnce() -> String) {
        self.lifecycle.diag().emit(level, message);
    }

    /// Error route shared by every operation that propagates engine errors.
    fn fail<T>(&self, err: EngineError, describe: impl FnOnce() -> String) -> Result<T> {
        self.emit(Level::Danger, || format!("{}: {}", describe(), err));
        Err(Error::Engine(err))
    }

    /// Error route for counts and listings: a default value unless strict.
    fn lenient<T: Default>(&self, err: EngineError, describe: impl FnOnce() -> String) -> Result<T> {
        if self.lifecycle.options().strict_aggregates {
            return self.fail(err, describe);
        }
        self.emit(Level::Danger, || format!("{}: {}", describe(), err));
        Ok(T::default())
    }

    /// Write the generated key into an in-line keyed record so the caller sees
    /// the record as stored.
    fn complete(&self, store: &str, mut value: Value, key: Key) -> Stored {
        if let Some(path) = self
            .schema()
            .get_store(store)
            .and_then(|s| s.options.key_path.as_ref())
        {
            if path.extract(&value).is_none() {
                path.inject(&mut value, &key);
            }
        }
        Stored { value, key }
    }

    async fn write(&self, store: &str, value: Value, key: Option<Key>, overwrite: bool) -> Result<Stored> {
        let (verb, request) = if overwrite {
            (
                "updated",
                Request::Put {
                    value: value.clone(),
                    key: key.clone(),
                },
            )
        } else {
            (
                "written",
                Request::Add {
                    value: value.clone(),
                    key: key.clone(),
                },
            )
        };
        let stored = self
            .run(
                store,
                request,
                |response| {
                    response.into_key()?.ok_or_else(|| {
                        EngineError::unknown("engine did not report the stored key")
                    })
                },
                |err| {
                    self.fail(err, || {
                        format!(
                            "{}_{}:{} not {}",
                            store,
                            key_label(key.as_ref()),
                            value,
                            verb
                        )
                    })
                },
            )
            .await?;
        let stored = self.complete(store, value, stored);
        self.emit(Level::Success, || {
            format!("{}_{}:{} {}", store, stored.key, stored.value, verb)
        });
        Ok(stored)
    }

    /// Insert a record. Fails with the engine's `ConstraintError` if the key is
    /// already taken.
    pub async fn add(&self, store: &str, value: Value, key: Option<Key>) -> Result<Stored> {
        self.write(store, value, key, false).await
    }

    /// Insert or overwrite a record.
    pub async fn put(&self, store: &str, value: Value, key: Option<Key>) -> Result<Stored> {
        self.write(store, value, key, true).await
    }

    /// `put` if `search_key` finds an existing record, `add` otherwise.
    ///
    /// A failed lookup, or no search key at all, falls through to `add`.
    pub async fn add_or_put(
        &self,
        store: &str,
        value: Value,
        search_key: Option<Query>,
        key: Option<Key>,
    ) -> Result<Stored> {
        let existing = match search_key {
            Some(query) => self.get(store, query).await,
            None => Ok(None),
        };
        match existing {
            Ok(Some(_)) => self.put(store, value, key).await,
            Ok(None) => self.add(store, value, key).await,
            Err(err) => {
                tracing::debug!(store, error = %err, "lookup failed, adding instead");
                self.add(store, value, key).await
            }
        }
    }

    /// Remove every record in a store.
    pub async fn clear(&self, store: &str) -> Result<()> {
        self.run(store, Request::Clear, Response::into_done, |err| {
            self.fail(err, || format!("{} not cleared", store))
        })
        .await?;
        self.emit(Level::Success, || format!("{} cleared", store));
        Ok(())
    }

    /// Remove the record(s) matching a primary key or key range.
    pub async fn remove(&self, store: &str, query: impl Into<Query>) -> Result<()> {
        let query = query.into();
        let label = query.to_string();
        self.run(store, Request::Delete(query), Response::into_done, |err| {
            self.fail(err, || format!("{}_{}: not removed", store, label))
        })
        .await?;
        self.emit(Level::Success, || format!("{}_{}: removed", store, label));
        Ok(())
    }

    /// Number of records matching `query` (all records when `None`).
    pub async fn count(&self, store: &str, query: Option<Query>) -> Result<u64> {
        let label = query_label(query.as_ref());
        self.run(store, Request::Count(query), Response::into_count, |err| {
            self.lenient(err, || format!("{}_{}: count failed", store, label))
        })
        .await
    }

    /// The first record matching `query`, or `None`.
    pub async fn get(&self, store: &str, query: impl Into<Query>) -> Result<Option<Value>> {
        let query = query.into();
        let label = query.to_string();
        let record = self
            .run(store, Request::Get(query), Response::into_record, |err| {
                self.fail(err, || format!("get {}_{} failed", store, label))
            })
            .await?;
        if record.is_none() {
            self.emit(Level::Warning, || format!("{}_{}: no record", store, label));
        }
        Ok(record)
    }

    /// Records matching `query`, in key order, at most `count` of them.
    pub async fn get_all(
        &self,
        store: &str,
        query: Option<Query>,
        count: Option<u32>,
    ) -> Result<Vec<Value>> {
        let label = query_label(query.as_ref());
        self.run(
            store,
            Request::GetAll { query, count },
            Response::into_records,
            |err| self.lenient(err, || format!("{}_{}: getAll failed", store, label)),
        )
        .await
    }

    /// Primary keys matching `query`, in key order, at most `count` of them.
    pub async fn get_all_keys(
        &self,
        store: &str,
        query: Option<Query>,
        count: Option<u32>,
    ) -> Result<Vec<Key>> {
        let label = query_label(query.as_ref());
        self.run(
            store,
            Request::GetAllKeys { query, count },
            Response::into_keys,
            |err| self.lenient(err, || format!("{}_{}: getAllKeys failed", store, label)),
        )
        .await
    }

    /// Primary key of the first record matching `query`, or `None`.
    pub async fn get_key(&self, store: &str, query: impl Into<Query>) -> Result<Option<Key>> {
        let query = query.into();
        let label = query.to_string();
        let key = self
            .run(store, Request::GetKey(query), Response::into_key, |err| {
                self.fail(err, || format!("getKey {}_{} failed", store, label))
            })
            .await?;
        if key.is_none() {
            self.emit(Level::Warning, || format!("{}_{}: no key", store, label));
        }
        Ok(key)
    }

    /// Records whose `index` value matches `query`, in index order.
    pub async fn get_index(
        &self,
        store: &str,
        index: &str,
        query: impl Into<Query>,
    ) -> Result<Vec<Value>> {
        let query = query.into();
        let label = query.to_string();
        let request = Request::IndexGetAll {
            index: index.to_string(),
            query: Some(query),
            count: None,
        };
        let records = self
            .run(store, request, Response::into_records, |err| {
                self.fail(err, || format!("{}_{}: get {} failed", store, index, label))
            })
            .await?;
        if records.is_empty() {
            self.emit(Level::Warning, || {
                format!("{}_{}_{}: no record", store, index, label)
            });
        } else {
            self.emit(Level::Success, || {
                format!(
                    "{}_{}_{}:{}",
                    store,
                    index,
                    label,
                    Value::Array(records.clone())
                )
            });
        }
        Ok(records)
    }

    /// Number of index entries matching `query`.
    pub async fn get_index_count(
        &self,
        store: &str,
        index: &str,
        query: impl Into<Query>,
    ) -> Result<u64> {
        let query = query.into();
        let label = query.to_string();
        let request = Request::IndexCount {
            index: index.to_string(),
            query: Some(query),
        };
        self.run(
            store,
            request,
            |response| {
                let count = response.into_count()?;
                self.emit(Level::Success, || {
                    format!("{}_{}_{}:{}", store, index, label, count)
                });
                Ok(count)
            },
            |err| self.lenient(err, || format!("{}_{}_{}: count failed", store, index, label)),
        )
        .await
    }

    /// Delete every record whose `index` value equals `key`.
    ///
    /// Walks a key cursor over the index and deletes each record by primary
    /// key, all in one transaction; resolves once the cursor is exhausted with
    /// the number of records deleted.
    pub async fn remove_index(&self, store: &str, index: &str, key: impl Into<Key>) -> Result<u64> {
        let key = key.into();
        let label = key.to_string();
        let request = Request::IndexDelete {
            index: index.to_string(),
            query: Query::Range(KeyRange::only(key)),
        };
        let deleted = self
            .run(store, request, Response::into_count, |err| {
                self.fail(err, || format!("{}_{}: remove {} failed", store, index, label))
            })
            .await?;
        if deleted == 0 {
            self.emit(Level::Warning, || {
                format!("{}_{}_{}: no record", store, index, label)
            });
        } else {
            self.emit(Level::Success, || {
                format!("{}_{}_{}: removed {}", store, index, label, deleted)
            });
        }
        Ok(deleted)
    }
}

impl<E: StorageEngine + std::fmt::Debug> std::fmt::Debug for Database<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("state", &self.state())
            .field("engine", self.engine())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineErrorKind, MemoryEngine};
    use crate::schema::{StoreOptions, StoreSchema};
    use serde_json::json;

    fn db() -> Database<MemoryEngine> {
        Database::new(
            MemoryEngine::new(),
            DatabaseSchema::new("unit", 1)
                .store(StoreSchema::new("auto").options(StoreOptions::key_path("id").auto_increment()))
                .store(StoreSchema::new("loose")),
        )
        .without_sink()
    }

    #[tokio::test]
    async fn test_generated_key_is_returned_in_record() {
        let db = db();
        db.initialize(InitOptions::default()).await.unwrap();

        let stored = db.add("auto", json!({ "v": 1 }), None).await.unwrap();
        assert_eq!(stored.key, Key::from(1));
        assert_eq!(stored.value, json!({ "v": 1, "id": 1 }));
    }

    #[tokio::test]
    async fn test_out_of_line_key() {
        let db = db();
        db.initialize(InitOptions::default()).await.unwrap();

        let stored = db
            .put("loose", json!("plain value"), Some(Key::from("k")))
            .await
            .unwrap();
        assert_eq!(stored.value, json!("plain value"));
        assert_eq!(
            db.get("loose", "k").await.unwrap(),
            Some(json!("plain value"))
        );

        let err = db.add("loose", json!(1), None).await.unwrap_err();
        assert_eq!(err.engine_error().unwrap().kind, EngineErrorKind::Data);
    }

    #[tokio::test]
    async fn test_missing_store_is_engine_error() {
        let db = db();
        db.initialize(InitOptions::default()).await.unwrap();

        let err = db.get("nope", 1).await.unwrap_err();
        assert_eq!(err.engine_error().unwrap().kind, EngineErrorKind::NotFound);
        assert_eq!(db.count("nope", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_guard_applies_to_lenient_operations() {
        let db = db();
        assert_eq!(db.count("auto", None).await.unwrap_err(), Error::Unavailable);
        assert_eq!(
            db.get_all("auto", None, None).await.unwrap_err(),
            Error::Unavailable
        );
    }
}
