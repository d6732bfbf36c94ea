//! `IndexDb` and `Table` JS classes
//!
//! Every method returns a `Promise`. Arguments are converted inside the promise,
//! so a bad key rejects rather than throws. `undefined` is the absent marker.

use std::rc::Rc;

use idbkit_core::{Database, DatabaseSchema, EngineError, InitOptions, Key, Query, StoreSchema};
use idbkit_indexeddb::convert;
use idbkit_indexeddb::IndexedDbEngine;
use js_sys::{Array, Promise};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use crate::console::ConsoleSink;
use crate::error::{conversion_to_js, engine_to_js, to_js, type_error};

type Db = Rc<Database<IndexedDbEngine>>;
type JsResult = Result<JsValue, JsValue>;

fn record(value: &JsValue) -> Result<Value, JsValue> {
    convert::value_from_js(value).map_err(conversion_to_js)
}

/// IndexedDB rejects an `undefined` key with `DataError`.
fn missing_key(message: &str) -> JsValue {
    engine_to_js(&EngineError::data(message))
}

fn optional_key(value: &JsValue) -> Result<Option<Key>, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    convert::key_from_js(value).map(Some).map_err(conversion_to_js)
}

fn required_key(value: &JsValue) -> Result<Key, JsValue> {
    optional_key(value)?.ok_or_else(|| missing_key("a key is required"))
}

fn optional_query(value: &JsValue) -> Result<Option<Query>, JsValue> {
    convert::query_from_js(value).map_err(conversion_to_js)
}

fn required_query(value: &JsValue) -> Result<Query, JsValue> {
    optional_query(value)?.ok_or_else(|| missing_key("a key or key range is required"))
}

fn record_to_js(value: &Value) -> JsResult {
    convert::value_to_js(value).map_err(conversion_to_js)
}

fn records_to_js(values: &[Value]) -> JsResult {
    let array = Array::new();
    for value in values {
        array.push(&record_to_js(value)?);
    }
    Ok(array.into())
}

fn keys_to_js(keys: &[Key]) -> JsValue {
    keys.iter().map(convert::key_to_js).collect::<Array>().into()
}

fn parse<T: serde::de::DeserializeOwned + Default>(value: &JsValue, what: &str) -> Result<T, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(record(value)?)
        .map_err(|e| type_error(&format!("invalid {}: {}", what, e)))
}

// ============================================================================
// Operations shared by IndexDb and Table
// ============================================================================

fn add(db: Db, store: String, value: JsValue, key: JsValue, overwrite: bool) -> Promise {
    future_to_promise(async move {
        let value = record(&value)?;
        let key = optional_key(&key)?;
        let stored = if overwrite {
            db.put(&store, value, key).await
        } else {
            db.add(&store, value, key).await
        }
        .map_err(to_js)?;
        record_to_js(&stored.value)
    })
}

fn add_or_put(db: Db, store: String, value: JsValue, search_key: JsValue, key: JsValue) -> Promise {
    future_to_promise(async move {
        let value = record(&value)?;
        let search_key = optional_query(&search_key)?;
        let key = optional_key(&key)?;
        let stored = db
            .add_or_put(&store, value, search_key, key)
            .await
            .map_err(to_js)?;
        record_to_js(&stored.value)
    })
}

fn clear(db: Db, store: String) -> Promise {
    future_to_promise(async move {
        db.clear(&store).await.map_err(to_js)?;
        Ok(JsValue::UNDEFINED)
    })
}

fn remove(db: Db, store: String, key: JsValue) -> Promise {
    future_to_promise(async move {
        let query = required_query(&key)?;
        db.remove(&store, query).await.map_err(to_js)?;
        Ok(JsValue::UNDEFINED)
    })
}

fn count(db: Db, store: String, key: JsValue) -> Promise {
    future_to_promise(async move {
        let query = optional_query(&key)?;
        let n = db.count(&store, query).await.map_err(to_js)?;
        Ok(JsValue::from_f64(n as f64))
    })
}

fn get(db: Db, store: String, key: JsValue) -> Promise {
    future_to_promise(async move {
        let query = required_query(&key)?;
        match db.get(&store, query).await.map_err(to_js)? {
            Some(value) => record_to_js(&value),
            None => Ok(JsValue::UNDEFINED),
        }
    })
}

fn get_all(db: Db, store: String, query: JsValue, limit: Option<u32>) -> Promise {
    future_to_promise(async move {
        let query = optional_query(&query)?;
        let records = db.get_all(&store, query, limit).await.map_err(to_js)?;
        records_to_js(&records)
    })
}

fn get_all_keys(db: Db, store: String, query: JsValue, limit: Option<u32>) -> Promise {
    future_to_promise(async move {
        let query = optional_query(&query)?;
        let keys = db.get_all_keys(&store, query, limit).await.map_err(to_js)?;
        Ok(keys_to_js(&keys))
    })
}

fn get_key(db: Db, store: String, query: JsValue) -> Promise {
    future_to_promise(async move {
        let query = required_query(&query)?;
        match db.get_key(&store, query).await.map_err(to_js)? {
            Some(key) => Ok(convert::key_to_js(&key)),
            None => Ok(JsValue::UNDEFINED),
        }
    })
}

fn get_index(db: Db, store: String, index: String, key: JsValue) -> Promise {
    future_to_promise(async move {
        let query = required_query(&key)?;
        let records = db.get_index(&store, &index, query).await.map_err(to_js)?;
        records_to_js(&records)
    })
}

fn get_index_count(db: Db, store: String, index: String, key: JsValue) -> Promise {
    future_to_promise(async move {
        let query = required_query(&key)?;
        let n = db
            .get_index_count(&store, &index, query)
            .await
            .map_err(to_js)?;
        Ok(JsValue::from_f64(n as f64))
    })
}

fn remove_index(db: Db, store: String, index: String, key: JsValue) -> Promise {
    future_to_promise(async move {
        let key = required_key(&key)?;
        let n = db.remove_index(&store, &index, key).await.map_err(to_js)?;
        Ok(JsValue::from_f64(n as f64))
    })
}

fn close(db: Db) -> Promise {
    future_to_promise(async move {
        db.close().await.map_err(to_js)?;
        Ok(JsValue::UNDEFINED)
    })
}

// ============================================================================
// IndexDb
// ============================================================================

/// A named, versioned IndexedDB database.
///
/// ```js
/// const db = new IndexDb("pis", 1, [{ name: "test", options: { keyPath: "name" } }]);
/// await db.init({ debug: true });
/// await db.add("test", { name: "a", v: 1 });
/// ```
#[wasm_bindgen(js_name = IndexDb)]
pub struct IndexDb {
    db: Db,
}

#[wasm_bindgen(js_class = IndexDb)]
impl IndexDb {
    /// `stores` uses the `{ name, options, indexList }` shape. Version defaults
    /// to 1 and stores to none.
    #[wasm_bindgen(constructor)]
    pub fn new(name: String, version: Option<u32>, stores: JsValue) -> Result<IndexDb, JsValue> {
        console_error_panic_hook::set_once();

        let stores: Vec<StoreSchema> = parse(&stores, "store list")?;
        let mut schema = DatabaseSchema::new(name, version.unwrap_or(1));
        schema.stores = stores;

        let db = Database::new(IndexedDbEngine::new(), schema).with_sink(ConsoleSink);
        Ok(IndexDb { db: Rc::new(db) })
    }

    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.db.name().to_string()
    }

    #[wasm_bindgen(getter)]
    pub fn version(&self) -> u32 {
        self.db.version()
    }

    /// Open the database. Options: `{ debug, recovery: "disabled" | "deleteAndReopen", strictAggregates }`.
    /// Resolves with the `IDBDatabase`.
    ///
    /// With `deleteAndReopen`, a failed open rejects first and the delete and
    /// reopen run afterwards in the background.
    pub fn init(&self, options: JsValue) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            let options: InitOptions = parse(&options, "init options")?;
            match db.initialize(options).await {
                Ok(handle) => Ok(handle.into()),
                Err(err) => {
                    if db.recovery_pending() {
                        let db = db.clone();
                        spawn_local(async move {
                            // Outcome is reported through the diagnostics
                            let _ = db.recover().await;
                        });
                    }
                    Err(to_js(err))
                }
            }
        })
    }

    pub fn add(&self, store_name: String, value: JsValue, key: JsValue) -> Promise {
        add(self.db.clone(), store_name, value, key, false)
    }

    pub fn put(&self, store_name: String, value: JsValue, key: JsValue) -> Promise {
        add(self.db.clone(), store_name, value, key, true)
    }

    #[wasm_bindgen(js_name = addOrPut)]
    pub fn add_or_put(
        &self,
        store_name: String,
        value: JsValue,
        search_key: JsValue,
        key: JsValue,
    ) -> Promise {
        add_or_put(self.db.clone(), store_name, value, search_key, key)
    }

    pub fn clear(&self, store_name: String) -> Promise {
        clear(self.db.clone(), store_name)
    }

    pub fn remove(&self, store_name: String, key: JsValue) -> Promise {
        remove(self.db.clone(), store_name, key)
    }

    pub fn count(&self, store_name: String, key: JsValue) -> Promise {
        count(self.db.clone(), store_name, key)
    }

    pub fn get(&self, store_name: String, key: JsValue) -> Promise {
        get(self.db.clone(), store_name, key)
    }

    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self, store_name: String, query: JsValue, count: Option<u32>) -> Promise {
        get_all(self.db.clone(), store_name, query, count)
    }

    #[wasm_bindgen(js_name = getAllKeys)]
    pub fn get_all_keys(&self, store_name: String, query: JsValue, count: Option<u32>) -> Promise {
        get_all_keys(self.db.clone(), store_name, query, count)
    }

    #[wasm_bindgen(js_name = getKey)]
    pub fn get_key(&self, store_name: String, query: JsValue) -> Promise {
        get_key(self.db.clone(), store_name, query)
    }

    #[wasm_bindgen(js_name = getIndex)]
    pub fn get_index(&self, store_name: String, index_name: String, key: JsValue) -> Promise {
        get_index(self.db.clone(), store_name, index_name, key)
    }

    #[wasm_bindgen(js_name = getIndexCount)]
    pub fn get_index_count(&self, store_name: String, index_name: String, key: JsValue) -> Promise {
        get_index_count(self.db.clone(), store_name, index_name, key)
    }

    /// Resolves with the number of records deleted.
    #[wasm_bindgen(js_name = removeIndex)]
    pub fn remove_index(&self, store_name: String, index_name: String, key: JsValue) -> Promise {
        remove_index(self.db.clone(), store_name, index_name, key)
    }

    pub fn close(&self) -> Promise {
        close(self.db.clone())
    }

    #[wasm_bindgen(js_name = deleteDB)]
    pub fn delete_db(&self, name: String) -> Promise {
        let db = self.db.clone();
        future_to_promise(async move {
            db.delete_db(&name).await.map_err(to_js)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Store-scoped view sharing this connection.
    pub fn table(&self, name: String) -> Table {
        Table {
            db: self.db.clone(),
            store: name,
        }
    }
}

// ============================================================================
// Table
// ============================================================================

/// One store of an `IndexDb`, with the store name filled in.
#[wasm_bindgen]
pub struct Table {
    db: Db,
    store: String,
}

#[wasm_bindgen]
impl Table {
    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.store.clone()
    }

    pub fn add(&self, value: JsValue, key: JsValue) -> Promise {
        add(self.db.clone(), self.store.clone(), value, key, false)
    }

    pub fn put(&self, value: JsValue, key: JsValue) -> Promise {
        add(self.db.clone(), self.store.clone(), value, key, true)
    }

    #[wasm_bindgen(js_name = addOrPut)]
    pub fn add_or_put(&self, value: JsValue, search_key: JsValue, key: JsValue) -> Promise {
        add_or_put(self.db.clone(), self.store.clone(), value, search_key, key)
    }

    pub fn clear(&self) -> Promise {
        clear(self.db.clone(), self.store.clone())
    }

    pub fn remove(&self, key: JsValue) -> Promise {
        remove(self.db.clone(), self.store.clone(), key)
    }

    pub fn count(&self, key: JsValue) -> Promise {
        count(self.db.clone(), self.store.clone(), key)
    }

    pub fn get(&self, key: JsValue) -> Promise {
        get(self.db.clone(), self.store.clone(), key)
    }

    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self, query: JsValue, count: Option<u32>) -> Promise {
        get_all(self.db.clone(), self.store.clone(), query, count)
    }

    #[wasm_bindgen(js_name = getAllKeys)]
    pub fn get_all_keys(&self, query: JsValue, count: Option<u32>) -> Promise {
        get_all_keys(self.db.clone(), self.store.clone(), query, count)
    }

    #[wasm_bindgen(js_name = getKey)]
    pub fn get_key(&self, query: JsValue) -> Promise {
        get_key(self.db.clone(), self.store.clone(), query)
    }

    #[wasm_bindgen(js_name = getIndex)]
    pub fn get_index(&self, index_name: String, key: JsValue) -> Promise {
        get_index(self.db.clone(), self.store.clone(), index_name, key)
    }

    #[wasm_bindgen(js_name = getIndexCount)]
    pub fn get_index_count(&self, index_name: String, key: JsValue) -> Promise {
        get_index_count(self.db.clone(), self.store.clone(), index_name, key)
    }

    #[wasm_bindgen(js_name = removeIndex)]
    pub fn remove_index(&self, index_name: String, key: JsValue) -> Promise {
        remove_index(self.db.clone(), self.store.clone(), index_name, key)
    }

    /// Closes the whole database.
    pub fn close(&self) -> Promise {
        close(self.db.clone())
    }
}
