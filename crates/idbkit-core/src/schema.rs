//! Database descriptors: stores, their options and their indexes
//!
//! A [`DatabaseSchema`] is supplied once by the caller and never changes. It
//! deserializes from the plain-object shape browser callers already use:
//!
//! ```json
//! {
//!   "name": "pis",
//!   "version": 1,
//!   "stores": [
//!     { "name": "test", "options": { "keyPath": "name" },
//!       "indexList": [{ "name": "age", "options": { "unique": false } }] }
//!   ]
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::key::Key;

/// Path from a record to its key: one dotted path, or several for a compound key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// Evaluate this key path against a record.
    ///
    /// Returns `None` when any segment is missing or the value found is not a
    /// valid key.
    pub fn extract(&self, value: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => lookup(value, path).and_then(Key::from_value),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|p| lookup(value, p).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Write `key` into `value` at this path, creating intermediate objects.
    ///
    /// Only single paths can be injected; returns `false` for compound paths or
    /// when an intermediate segment is not an object.
    pub fn inject(&self, value: &mut Value, key: &Key) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        let mut current = value;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let Value::Object(map) = current else {
                return false;
            };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), key.to_value());
                return true;
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }
        false
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Compound(paths.into_iter().map(str::to_string).collect())
    }
}

/// Object store creation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreOptions {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
}

impl StoreOptions {
    pub fn key_path(path: impl Into<KeyPath>) -> Self {
        Self {
            key_path: Some(path.into()),
            auto_increment: false,
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Index creation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexOptions {
    pub unique: bool,
    pub multi_entry: bool,
}

/// A secondary index. The index name doubles as its key path into records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    #[serde(default)]
    pub options: IndexOptions,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: IndexOptions::default(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    pub fn multi_entry(mut self) -> Self {
        self.options.multi_entry = true;
        self
    }

    pub fn key_path(&self) -> KeyPath {
        KeyPath::Single(self.name.clone())
    }
}

/// A record store and the indexes created alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    #[serde(default)]
    pub options: StoreOptions,
    #[serde(default, alias = "indexList")]
    pub indexes: Vec<IndexSchema>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: StoreOptions::default(),
            indexes: Vec::new(),
        }
    }

    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }
}

fn default_version() -> u32 {
    1
}

/// Named, versioned database descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub stores: Vec<StoreSchema>,
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            stores: Vec::new(),
        }
    }

    pub fn store(mut self, store: StoreSchema) -> Self {
        self.stores.push(store);
        self
    }

    pub fn get_store(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Reject descriptors the engine could never open: version 0, or a store
    /// (or an index within a store) declared twice.
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(Error::InvalidSchema(format!(
                "database {} must have a positive version",
                self.name
            )));
        }
        let mut stores = HashSet::new();
        for store in &self.stores {
            if !stores.insert(store.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "store {} declared twice",
                    store.name
                )));
            }
            let mut indexes = HashSet::new();
            for index in &store.indexes {
                if !indexes.insert(index.name.as_str()) {
                    return Err(Error::InvalidSchema(format!(
                        "index {} declared twice on store {}",
                        index.name, store.name
                    )));
                }
            }
        }
        Ok(())
    }
}
