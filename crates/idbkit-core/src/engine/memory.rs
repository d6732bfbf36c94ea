//! In-memory storage engine
//!
//! A BTreeMap-based engine following IndexedDB semantics closely enough to stand
//! in for the browser engine in native tests: key paths and key generators,
//! unique and multi-entry indexes, version checks and all-or-nothing upgrades.
//! Not persistent.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use serde_json::Value;

use super::{
    EngineError, EngineErrorKind, EngineResult, Request, Response, StorageEngine,
    TransactionMode, UpgradeContext, UpgradeFn, VersionChange,
};
use crate::key::{Key, Query};
use crate::schema::{IndexOptions, KeyPath, StoreOptions};

/// Largest key the generator hands out (2^53), as in IndexedDB.
const MAX_GENERATED_KEY: u64 = 9_007_199_254_740_992;

/// Connection to a database held by a [`MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle {
    name: String,
    connection: u64,
}

impl MemoryHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
struct MemIndex {
    key_path: KeyPath,
    options: IndexOptions,
}

impl MemIndex {
    /// Index keys a record contributes to this index.
    fn keys_for(&self, value: &Value) -> Vec<Key> {
        if self.options.multi_entry {
            if let KeyPath::Single(path) = &self.key_path {
                let found = if path.is_empty() {
                    Some(value)
                } else {
                    path.split('.').try_fold(value, |v, segment| v.get(segment))
                };
                if let Some(Value::Array(items)) = found {
                    let unique: BTreeSet<Key> = items.iter().filter_map(Key::from_value).collect();
                    return unique.into_iter().collect();
                }
            }
        }
        self.key_path.extract(value).into_iter().collect()
    }
}

#[derive(Debug, Clone)]
struct MemStore {
    options: StoreOptions,
    records: BTreeMap<Key, Value>,
    indexes: BTreeMap<String, MemIndex>,
    next_key: u64,
}

impl MemStore {
    fn new(options: StoreOptions) -> Self {
        Self {
            options,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
            next_key: 1,
        }
    }

    fn index(&self, name: &str) -> EngineResult<&MemIndex> {
        self.indexes
            .get(name)
            .ok_or_else(|| EngineError::not_found(format!("index {} does not exist", name)))
    }

    /// `(index key, primary key)` pairs for an index, in index order.
    fn entries(&self, index: &MemIndex) -> Vec<(Key, Key)> {
        let mut entries: Vec<(Key, Key)> = self
            .records
            .iter()
            .flat_map(|(primary, value)| {
                index
                    .keys_for(value)
                    .into_iter()
                    .map(move |k| (k, primary.clone()))
            })
            .collect();
        entries.sort();
        entries
    }

    fn generate_key(&mut self) -> EngineResult<Key> {
        if self.next_key > MAX_GENERATED_KEY {
            return Err(EngineError::constraint("key generator exhausted"));
        }
        let key = Key::Number(self.next_key as f64);
        self.next_key += 1;
        Ok(key)
    }

    /// Explicit numeric keys push the generator past them.
    fn observe_key(&mut self, key: &Key) {
        if !self.options.auto_increment {
            return;
        }
        if let Key::Number(n) = key {
            if *n >= self.next_key as f64 {
                self.next_key = if *n >= MAX_GENERATED_KEY as f64 {
                    MAX_GENERATED_KEY + 1
                } else {
                    n.floor() as u64 + 1
                };
            }
        }
    }

    /// Work out the primary key for a write, generating and injecting one when
    /// the store has a key generator.
    fn resolve_key(&mut self, value: &mut Value, key: Option<Key>) -> EngineResult<Key> {
        let resolved = match (&self.options.key_path, key) {
            (Some(_), Some(_)) => {
                return Err(EngineError::data(
                    "store uses in-line keys and an explicit key was provided",
                ))
            }
            (Some(path), None) => match path.extract(value) {
                Some(key) => key,
                None if self.options.auto_increment => {
                    let path = path.clone();
                    let key = self.generate_key()?;
                    if !path.inject(value, &key) {
                        return Err(EngineError::data(
                            "generated key could not be written to the record",
                        ));
                    }
                    return Ok(key);
                }
                None => {
                    return Err(EngineError::data(
                        "evaluating the key path did not yield a valid key",
                    ))
                }
            },
            (None, Some(key)) => key,
            (None, None) if self.options.auto_increment => return self.generate_key(),
            (None, None) => {
                return Err(EngineError::data(
                    "store uses out-of-line keys and has no key generator; a key is required",
                ))
            }
        };
        if !resolved.is_valid() {
            return Err(EngineError::data(format!("{} is not a valid key", resolved)));
        }
        self.observe_key(&resolved);
        Ok(resolved)
    }

    fn check_unique(&self, primary: &Key, value: &Value) -> EngineResult<()> {
        for (name, index) in &self.indexes {
            if !index.options.unique {
                continue;
            }
            for index_key in index.keys_for(value) {
                let taken = self
                    .records
                    .iter()
                    .filter(|(other, _)| *other != primary)
                    .any(|(_, other)| index.keys_for(other).contains(&index_key));
                if taken {
                    return Err(EngineError::constraint(format!(
                        "unique index {} already contains {}",
                        name, index_key
                    )));
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, mut value: Value, key: Option<Key>, overwrite: bool) -> EngineResult<Key> {
        let primary = self.resolve_key(&mut value, key)?;
        if !overwrite && self.records.contains_key(&primary) {
            return Err(EngineError::constraint(format!(
                "a record with key {} already exists",
                primary
            )));
        }
        self.check_unique(&primary, &value)?;
        self.records.insert(primary.clone(), value);
        Ok(primary)
    }

    fn matching<'a>(
        &'a self,
        query: Option<&'a Query>,
    ) -> impl Iterator<Item = (&'a Key, &'a Value)> + 'a {
        self.records
            .iter()
            .filter(move |(key, _)| query.map_or(true, |q| q.matches(key)))
    }

    fn apply(&mut self, request: Request) -> EngineResult<Response> {
        match request {
            Request::Get(query) => {
                check_query(Some(&query))?;
                let found = self.matching(Some(&query)).next().map(|(_, v)| v.clone());
                Ok(Response::Record(found))
            }
            Request::GetAll { query, count } => {
                check_query(query.as_ref())?;
                let records = self
                    .matching(query.as_ref())
                    .take(limit(count))
                    .map(|(_, v)| v.clone())
                    .collect();
                Ok(Response::Records(records))
            }
            Request::GetKey(query) => {
                check_query(Some(&query))?;
                let found = self.matching(Some(&query)).next().map(|(k, _)| k.clone());
                Ok(Response::Key(found))
            }
            Request::GetAllKeys { query, count } => {
                check_query(query.as_ref())?;
                let keys = self
                    .matching(query.as_ref())
                    .take(limit(count))
                    .map(|(k, _)| k.clone())
                    .collect();
                Ok(Response::Keys(keys))
            }
            Request::Count(query) => {
                check_query(query.as_ref())?;
                Ok(Response::Count(self.matching(query.as_ref()).count() as u64))
            }
            Request::Add { value, key } => {
                let key = self.write(value, key, false)?;
                Ok(Response::Key(Some(key)))
            }
            Request::Put { value, key } => {
                let key = self.write(value, key, true)?;
                Ok(Response::Key(Some(key)))
            }
            Request::Delete(query) => {
                check_query(Some(&query))?;
                let doomed: Vec<Key> = self
                    .matching(Some(&query))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in doomed {
                    self.records.remove(&key);
                }
                Ok(Response::Done)
            }
            Request::Clear => {
                self.records.clear();
                Ok(Response::Done)
            }
            Request::IndexGetAll {
                index,
                query,
                count,
            } => {
                check_query(query.as_ref())?;
                let index = self.index(&index)?;
                let records = self
                    .entries(index)
                    .into_iter()
                    .filter(|(k, _)| query.as_ref().map_or(true, |q| q.matches(k)))
                    .take(limit(count))
                    .filter_map(|(_, primary)| self.records.get(&primary).cloned())
                    .collect();
                Ok(Response::Records(records))
            }
            Request::IndexCount { index, query } => {
                check_query(query.as_ref())?;
                let index = self.index(&index)?;
                let count = self
                    .entries(index)
                    .iter()
                    .filter(|(k, _)| query.as_ref().map_or(true, |q| q.matches(k)))
                    .count();
                Ok(Response::Count(count as u64))
            }
            Request::IndexDelete { index, query } => {
                check_query(Some(&query))?;
                let index = self.index(&index)?;
                let cursor: Vec<Key> = self
                    .entries(index)
                    .into_iter()
                    .filter(|(k, _)| query.matches(k))
                    .map(|(_, primary)| primary)
                    .collect();
                // A multi-entry record can sit under several matching entries;
                // once deleted, its later entries are gone from the cursor.
                let mut deleted = 0;
                for primary in cursor {
                    if self.records.remove(&primary).is_some() {
                        deleted += 1;
                    }
                }
                Ok(Response::Deleted(deleted))
            }
        }
    }
}

fn limit(count: Option<u32>) -> usize {
    match count {
        Some(0) | None => usize::MAX,
        Some(n) => n as usize,
    }
}

fn check_query(query: Option<&Query>) -> EngineResult<()> {
    match query {
        Some(q) if !q.is_valid() => Err(EngineError::data(format!("{} is not a valid key", q))),
        _ => Ok(()),
    }
}

#[derive(Debug)]
struct MemDatabase {
    version: u32,
    stores: BTreeMap<String, MemStore>,
}

#[derive(Debug, Default)]
struct Inner {
    databases: BTreeMap<String, MemDatabase>,
    /// Live connections: connection id to database name.
    connections: HashMap<u64, String>,
    next_connection: u64,
    open_failures: VecDeque<EngineError>,
}

impl Inner {
    fn database(&mut self, handle: &MemoryHandle) -> EngineResult<&mut MemDatabase> {
        match self.connections.get(&handle.connection) {
            Some(name) if *name == handle.name => {}
            _ => {
                return Err(EngineError::invalid_state(format!(
                    "connection to {} is closed",
                    handle.name
                )))
            }
        }
        self.databases
            .get_mut(&handle.name)
            .ok_or_else(|| EngineError::invalid_state(format!("database {} was deleted", handle.name)))
    }
}

/// Schema editor over a staged copy of a database's stores.
struct MemoryUpgrade {
    stores: BTreeMap<String, MemStore>,
}

impl UpgradeContext for MemoryUpgrade {
    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn has_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    fn create_store(&mut self, name: &str, options: &StoreOptions) -> EngineResult<()> {
        if self.stores.contains_key(name) {
            return Err(EngineError::constraint(format!("store {} already exists", name)));
        }
        let invalid_generator = match &options.key_path {
            Some(KeyPath::Compound(_)) => true,
            Some(KeyPath::Single(path)) => path.is_empty(),
            None => false,
        };
        if options.auto_increment && invalid_generator {
            return Err(EngineError::new(
                EngineErrorKind::Other("InvalidAccessError".into()),
                "key generators need a non-empty, non-compound key path",
            ));
        }
        self.stores
            .insert(name.to_string(), MemStore::new(options.clone()));
        Ok(())
    }

    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: &KeyPath,
        options: &IndexOptions,
    ) -> EngineResult<()> {
        let target = self
            .stores
            .get_mut(store)
            .ok_or_else(|| EngineError::not_found(format!("store {} does not exist", store)))?;
        if target.indexes.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "index {} already exists on {}",
                name, store
            )));
        }
        if options.multi_entry && matches!(key_path, KeyPath::Compound(_)) {
            return Err(EngineError::new(
                EngineErrorKind::Other("InvalidAccessError".into()),
                "multi-entry indexes cannot use a compound key path",
            ));
        }
        let index = MemIndex {
            key_path: key_path.clone(),
            options: *options,
        };
        if options.unique {
            let mut seen = BTreeSet::new();
            for value in target.records.values() {
                for key in index.keys_for(value) {
                    if !seen.insert(key.clone()) {
                        return Err(EngineError::constraint(format!(
                            "existing records violate unique index {} at {}",
                            name, key
                        )));
                    }
                }
            }
        }
        target.indexes.insert(name.to_string(), index);
        Ok(())
    }
}

/// In-memory engine. Clones share the same databases.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    inner: Rc<RefCell<Inner>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` call fail with `error` before touching any database.
    /// Failures queue up, one per call.
    pub fn fail_next_open(&self, error: EngineError) {
        self.inner.borrow_mut().open_failures.push_back(error);
    }

    /// Stored version of a database, if it exists.
    pub fn version(&self, name: &str) -> Option<u32> {
        self.inner.borrow().databases.get(name).map(|db| db.version)
    }

    pub fn database_names(&self) -> Vec<String> {
        self.inner.borrow().databases.keys().cloned().collect()
    }

    /// Store names of a database, sorted; empty if the database does not exist.
    pub fn store_names(&self, name: &str) -> Vec<String> {
        self.inner
            .borrow()
            .databases
            .get(name)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Index names of a store, sorted.
    pub fn index_names(&self, name: &str, store: &str) -> Vec<String> {
        self.inner
            .borrow()
            .databases
            .get(name)
            .and_then(|db| db.stores.get(store))
            .map(|s| s.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of open connections to a database.
    pub fn connection_count(&self, name: &str) -> usize {
        self.inner
            .borrow()
            .connections
            .values()
            .filter(|n| *n == name)
            .count()
    }
}

impl StorageEngine for MemoryEngine {
    type Handle = MemoryHandle;

    async fn open(
        &self,
        name: &str,
        version: u32,
        mut upgrade: UpgradeFn,
    ) -> EngineResult<MemoryHandle> {
        if let Some(error) = self.inner.borrow_mut().open_failures.pop_front() {
            return Err(error);
        }
        if version == 0 {
            return Err(EngineError::new(
                EngineErrorKind::Type,
                "version must be a positive integer",
            ));
        }

        let staged = {
            let inner = self.inner.borrow();
            match inner.databases.get(name) {
                Some(db) if db.version > version => {
                    return Err(EngineError::version(format!(
                        "requested version {} is lower than the stored version {}",
                        version, db.version
                    )))
                }
                Some(db) if db.version == version => None,
                Some(db) => Some((db.version, db.stores.clone())),
                None => Some((0, BTreeMap::new())),
            }
        };

        // Upgrade runs against a copy so a failing routine leaves nothing behind.
        if let Some((old_version, stores)) = staged {
            tracing::debug!(name, old_version, version, "upgrading in-memory database");
            let mut context = MemoryUpgrade { stores };
            let change = VersionChange {
                old_version,
                new_version: version,
            };
            upgrade(&mut context, change)?;
            self.inner.borrow_mut().databases.insert(
                name.to_string(),
                MemDatabase {
                    version,
                    stores: context.stores,
                },
            );
        }

        let mut inner = self.inner.borrow_mut();
        let connection = inner.next_connection;
        inner.next_connection += 1;
        inner.connections.insert(connection, name.to_string());
        Ok(MemoryHandle {
            name: name.to_string(),
            connection,
        })
    }

    async fn execute(
        &self,
        handle: &MemoryHandle,
        store: &str,
        mode: TransactionMode,
        request: Request,
    ) -> EngineResult<Response> {
        if mode == TransactionMode::ReadOnly && request.mode() == TransactionMode::ReadWrite {
            return Err(EngineError::new(
                EngineErrorKind::ReadOnly,
                format!("{} in a read-only transaction", request.name()),
            ));
        }
        let mut inner = self.inner.borrow_mut();
        let db = inner.database(handle)?;
        let target = db
            .stores
            .get_mut(store)
            .ok_or_else(|| EngineError::not_found(format!("store {} does not exist", store)))?;
        target.apply(request)
    }

    async fn close(&self, handle: &MemoryHandle) -> EngineResult<()> {
        self.inner
            .borrow_mut()
            .connections
            .remove(&handle.connection);
        Ok(())
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.inner.borrow_mut();
        // Deletion force-closes whatever connections are still open.
        inner.connections.retain(|_, db| db != name);
        inner.databases.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyRange;
    use serde_json::json;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn people_upgrade() -> UpgradeFn {
        Box::new(|ctx: &mut dyn UpgradeContext, _: VersionChange| {
            if !ctx.has_store("people") {
                ctx.create_store("people", &StoreOptions::key_path("id").auto_increment())?;
                ctx.create_index(
                    "people",
                    "email",
                    &KeyPath::from("email"),
                    &IndexOptions {
                        unique: true,
                        multi_entry: false,
                    },
                )?;
                ctx.create_index(
                    "people",
                    "tags",
                    &KeyPath::from("tags"),
                    &IndexOptions {
                        unique: false,
                        multi_entry: true,
                    },
                )?;
            }
            Ok(())
        })
    }

    fn no_upgrade() -> UpgradeFn {
        Box::new(|_: &mut dyn UpgradeContext, _: VersionChange| Ok(()))
    }

    fn open_people(engine: &MemoryEngine) -> MemoryHandle {
        block_on(engine.open("db", 1, people_upgrade())).unwrap()
    }

    fn exec(engine: &MemoryEngine, handle: &MemoryHandle, request: Request) -> EngineResult<Response> {
        let mode = request.mode();
        block_on(engine.execute(handle, "people", mode, request))
    }

    #[test]
    fn test_key_generator_injects_key() {
        let engine = MemoryEngine::new();
        let handle = open_people(&engine);

        let key = exec(
            &engine,
            &handle,
            Request::Add {
                value: json!({ "name": "a" }),
                key: None,
            },
        )
        .unwrap()
        .into_key()
        .unwrap();
        assert_eq!(key, Some(Key::from(1)));

        let stored = exec(&engine, &handle, Request::Get(Query::from(1)))
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(stored, Some(json!({ "name": "a", "id": 1 })));
    }

    #[test]
    fn test_explicit_key_advances_generator() {
        let engine = MemoryEngine::new();
        let handle = open_people(&engine);
        exec(
            &engine,
            &handle,
            Request::Put {
                value: json!({ "id": 10 }),
                key: None,
            },
        )
        .unwrap();
        let key = exec(
            &engine,
            &handle,
            Request::Add {
                value: json!({}),
                key: None,
            },
        )
        .unwrap()
        .into_key()
        .unwrap();
        assert_eq!(key, Some(Key::from(11)));
    }

    #[test]
    fn test_inline_store_rejects_explicit_key() {
        let engine = MemoryEngine::new();
        let handle = open_people(&engine);
        let err = exec(
            &engine,
            &handle,
            Request::Add {
                value: json!({ "id": 1 }),
                key: Some(Key::from(1)),
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Data);
    }

    #[test]
    fn test_unique_index_violation() {
        let engine = MemoryEngine::new();
        let handle = open_people(&engine);
        exec(
            &engine,
            &handle,
            Request::Add {
                value: json!({ "email": "a@x" }),
                key: None,
            },
        )
        .unwrap();
        let err = exec(
            &engine,
            &handle,
            Request::Add {
                value: json!({ "email": "a@x" }),
                key: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Constraint);

        // Overwriting the same record with its own email is fine.
        exec(
            &engine,
            &handle,
            Request::Put {
                value: json!({ "id": 1, "email": "a@x", "v": 2 }),
                key: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_multi_entry_index() {
        let engine = MemoryEngine::new();
        let handle = open_people(&engine);
        for tags in [json!(["red", "blue"]), json!(["blue"]), json!(["green"])] {
            exec(
                &engine,
                &handle,
                Request::Add {
                    value: json!({ "tags": tags }),
                    key: None,
                },
            )
            .unwrap();
        }

        let blue = exec(
            &engine,
            &handle,
            Request::IndexCount {
                index: "tags".into(),
                query: Some(Query::from("blue")),
            },
        )
        .unwrap()
        .into_count()
        .unwrap();
        assert_eq!(blue, 2);

        let deleted = exec(
            &engine,
            &handle,
            Request::IndexDelete {
                index: "tags".into(),
                query: Query::from(KeyRange::only("blue")),
            },
        )
        .unwrap()
        .into_count()
        .unwrap();
        assert_eq!(deleted, 2);

        let left = exec(&engine, &handle, Request::Count(None))
            .unwrap()
            .into_count()
            .unwrap();
        assert_eq!(left, 1);
    }

    #[test]
    fn test_missing_index_is_not_found() {
        let engine = MemoryEngine::new();
        let handle = open_people(&engine);
        let err = exec(
            &engine,
            &handle,
            Request::IndexGetAll {
                index: "nope".into(),
                query: None,
                count: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::NotFound);
    }

    #[test]
    fn test_lower_version_fails() {
        let engine = MemoryEngine::new();
        block_on(engine.open("db", 3, no_upgrade())).unwrap();
        let err = block_on(engine.open("db", 2, no_upgrade())).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Version);
        assert_eq!(engine.version("db"), Some(3));
    }

    #[test]
    fn test_failed_upgrade_leaves_nothing() {
        let engine = MemoryEngine::new();
        let err = block_on(engine.open(
            "db",
            1,
            Box::new(|ctx: &mut dyn UpgradeContext, _: VersionChange| {
                ctx.create_store("a", &StoreOptions::default())?;
                Err(EngineError::new(EngineErrorKind::Abort, "stop"))
            }),
        ))
        .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Abort);
        assert_eq!(engine.version("db"), None);
        assert!(engine.database_names().is_empty());
    }

    #[test]
    fn test_closed_handle_is_invalid() {
        let engine = MemoryEngine::new();
        let handle = open_people(&engine);
        block_on(engine.close(&handle)).unwrap();
        let err = exec(&engine, &handle, Request::Count(None)).unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::InvalidState);
    }

    #[test]
    fn test_get_all_limit_and_range() {
        let engine = MemoryEngine::new();
        let handle = open_people(&engine);
        for _ in 0..5 {
            exec(
                &engine,
                &handle,
                Request::Add {
                    value: json!({}),
                    key: None,
                },
            )
            .unwrap();
        }
        let keys = exec(
            &engine,
            &handle,
            Request::GetAllKeys {
                query: Some(Query::from(KeyRange::bound(2, 5, false, true).unwrap())),
                count: Some(2),
            },
        )
        .unwrap()
        .into_keys()
        .unwrap();
        assert_eq!(keys, vec![Key::from(2), Key::from(3)]);
    }
}
