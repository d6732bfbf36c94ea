//! Store-scoped view of a [`Database`]

use serde_json::Value;

use crate::database::{Database, Stored};
use crate::engine::StorageEngine;
use crate::error::Result;
use crate::key::{Key, Query};

/// One object store of a database. Every call forwards to the matching
/// [`Database`] operation with the store name filled in.
pub struct Table<'a, E: StorageEngine> {
    db: &'a Database<E>,
    store: String,
}

impl<'a, E: StorageEngine> Table<'a, E> {
    pub(crate) fn new(db: &'a Database<E>, store: String) -> Self {
        Self { db, store }
    }

    pub fn name(&self) -> &str {
        &self.store
    }

    pub fn database(&self) -> &'a Database<E> {
        self.db
    }

    pub async fn add(&self, value: Value, key: Option<Key>) -> Result<Stored> {
        self.db.add(&self.store, value, key).await
    }

    pub async fn put(&self, value: Value, key: Option<Key>) -> Result<Stored> {
        self.db.put(&self.store, value, key).await
    }

    pub async fn add_or_put(
        &self,
        value: Value,
        search_key: Option<Query>,
        key: Option<Key>,
    ) -> Result<Stored> {
        self.db.add_or_put(&self.store, value, search_key, key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.db.clear(&self.store).await
    }

    pub async fn remove(&self, query: impl Into<Query>) -> Result<()> {
        self.db.remove(&self.store, query).await
    }

    pub async fn count(&self, query: Option<Query>) -> Result<u64> {
        self.db.count(&self.store, query).await
    }

    pub async fn get(&self, query: impl Into<Query>) -> Result<Option<Value>> {
        self.db.get(&self.store, query).await
    }

    pub async fn get_all(&self, query: Option<Query>, count: Option<u32>) -> Result<Vec<Value>> {
        self.db.get_all(&self.store, query, count).await
    }

    pub async fn get_all_keys(&self, query: Option<Query>, count: Option<u32>) -> Result<Vec<Key>> {
        self.db.get_all_keys(&self.store, query, count).await
    }

    pub async fn get_key(&self, query: impl Into<Query>) -> Result<Option<Key>> {
        self.db.get_key(&self.store, query).await
    }

    pub async fn get_index(&self, index: &str, query: impl Into<Query>) -> Result<Vec<Value>> {
        self.db.get_index(&self.store, index, query).await
    }

    pub async fn get_index_count(&self, index: &str, query: impl Into<Query>) -> Result<u64> {
        self.db.get_index_count(&self.store, index, query).await
    }

    pub async fn remove_index(&self, index: &str, key: impl Into<Key>) -> Result<u64> {
        self.db.remove_index(&self.store, index, key).await
    }

    /// Closes the whole database, not just this store.
    pub async fn close(&self) -> Result<()> {
        self.db.close().await
    }
}

impl<E: StorageEngine> Clone for Table<'_, E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            store: self.store.clone(),
        }
    }
}
