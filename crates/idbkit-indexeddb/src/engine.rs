//! `StorageEngine` over the browser's IndexedDB.
//!
//! Each `execute` call opens one transaction on one store, issues the request,
//! and waits for the transaction to commit before returning the response.

use idbkit_core::{
    EngineError, EngineResult, Request, Response, StorageEngine, TransactionMode, UpgradeFn,
};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{IdbCursor, IdbDatabase, IdbIndex, IdbObjectStore, IdbTransactionMode};

use crate::convert;
use crate::error::Result;
use crate::idb;

/// IndexedDB-backed storage engine for browser WASM.
///
/// Stateless: the connection lives in the handle (`IdbDatabase`), which the
/// database layer owns.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedDbEngine;

impl IndexedDbEngine {
    pub fn new() -> Self {
        Self
    }

    /// Whether an `indexedDB` global exists here.
    pub fn is_available() -> bool {
        idb::idb_factory().is_ok()
    }
}

fn idb_mode(mode: TransactionMode) -> IdbTransactionMode {
    match mode {
        TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
        TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
    }
}

/// Zero means no limit.
fn limit(count: Option<u32>) -> Option<u32> {
    count.filter(|n| *n > 0)
}

async fn count_result(req: web_sys::IdbRequest) -> Result<Response> {
    let result = idb::await_request(&req).await?;
    Ok(Response::Count(result.as_f64().unwrap_or(0.0) as u64))
}

async fn index_get_all(index: &IdbIndex, query: &JsValue, count: Option<u32>) -> Result<Response> {
    let req = match limit(count) {
        Some(n) => index.get_all_with_key_and_limit(query, n)?,
        None => index.get_all_with_key(query)?,
    };
    let result = idb::await_request(&req).await?;
    Ok(Response::Records(convert::records_from_js(&result)?))
}

/// Walk a key cursor over the matching index entries, deleting each record by
/// primary key, until the cursor is exhausted.
async fn index_delete(store: &IdbObjectStore, index: &IdbIndex, range: &JsValue) -> Result<u64> {
    let req = index.open_key_cursor_with_range(range)?;
    let mut deleted = 0u64;

    let mut cursor_val = idb::await_request(&req).await?;
    while !(cursor_val.is_undefined() || cursor_val.is_null()) {
        let cursor = cursor_val.dyn_into::<IdbCursor>()?;

        let primary = cursor.primary_key()?;
        let delete_req = store.delete(&primary)?;
        idb::await_request(&delete_req).await?;
        deleted += 1;

        cursor.continue_()?;
        cursor_val = idb::await_request(&req).await?;
    }

    Ok(deleted)
}

async fn apply(store: &IdbObjectStore, request: Request) -> Result<Response> {
    match request {
        Request::Get(query) => {
            let req = store.get(&convert::query_to_js(&query)?)?;
            let result = idb::await_request(&req).await?;
            Ok(Response::Record(convert::record_from_js(&result)?))
        }
        Request::GetAll { query, count } => {
            let query = convert::optional_query_to_js(query.as_ref())?;
            let req = match limit(count) {
                Some(n) => store.get_all_with_key_and_limit(&query, n)?,
                None => store.get_all_with_key(&query)?,
            };
            let result = idb::await_request(&req).await?;
            Ok(Response::Records(convert::records_from_js(&result)?))
        }
        Request::GetKey(query) => {
            let req = store.get_key(&convert::query_to_js(&query)?)?;
            let result = idb::await_request(&req).await?;
            Ok(Response::Key(convert::optional_key_from_js(&result)?))
        }
        Request::GetAllKeys { query, count } => {
            let query = convert::optional_query_to_js(query.as_ref())?;
            let req = match limit(count) {
                Some(n) => store.get_all_keys_with_key_and_limit(&query, n)?,
                None => store.get_all_keys_with_key(&query)?,
            };
            let result = idb::await_request(&req).await?;
            Ok(Response::Keys(convert::keys_from_js(&result)?))
        }
        Request::Count(query) => {
            let req = match query {
                Some(query) => store.count_with_key(&convert::query_to_js(&query)?)?,
                None => store.count()?,
            };
            count_result(req).await
        }
        Request::Add { value, key } => {
            let value = convert::value_to_js(&value)?;
            let req = match key {
                Some(key) => store.add_with_key(&value, &convert::key_to_js(&key))?,
                None => store.add(&value)?,
            };
            let result = idb::await_request(&req).await?;
            Ok(Response::Key(Some(convert::key_from_js(&result)?)))
        }
        Request::Put { value, key } => {
            let value = convert::value_to_js(&value)?;
            let req = match key {
                Some(key) => store.put_with_key(&value, &convert::key_to_js(&key))?,
                None => store.put(&value)?,
            };
            let result = idb::await_request(&req).await?;
            Ok(Response::Key(Some(convert::key_from_js(&result)?)))
        }
        Request::Delete(query) => {
            let req = store.delete(&convert::query_to_js(&query)?)?;
            idb::await_request(&req).await?;
            Ok(Response::Done)
        }
        Request::Clear => {
            let req = store.clear()?;
            idb::await_request(&req).await?;
            Ok(Response::Done)
        }
        Request::IndexGetAll {
            index,
            query,
            count,
        } => {
            let index = store.index(&index)?;
            let query = convert::optional_query_to_js(query.as_ref())?;
            index_get_all(&index, &query, count).await
        }
        Request::IndexCount { index, query } => {
            let index = store.index(&index)?;
            let req = match query {
                Some(query) => index.count_with_key(&convert::query_to_js(&query)?)?,
                None => index.count()?,
            };
            count_result(req).await
        }
        Request::IndexDelete { index, query } => {
            let index = store.index(&index)?;
            let range = convert::query_to_js(&query)?;
            let deleted = index_delete(store, &index, &range).await?;
            Ok(Response::Deleted(deleted))
        }
    }
}

impl StorageEngine for IndexedDbEngine {
    type Handle = IdbDatabase;

    async fn open(&self, name: &str, version: u32, upgrade: UpgradeFn) -> EngineResult<IdbDatabase> {
        tracing::debug!(name, version, "opening IndexedDB database");
        Ok(idb::open_database(name, version, upgrade).await?)
    }

    async fn execute(
        &self,
        handle: &IdbDatabase,
        store: &str,
        mode: TransactionMode,
        request: Request,
    ) -> EngineResult<Response> {
        let (tx, object_store) = idb::begin_transaction(handle, store, idb_mode(mode))?;
        let response = apply(&object_store, request).await?;
        idb::await_transaction(&tx).await?;
        Ok(response)
    }

    /// `IDBDatabase.close()` is synchronous; the connection finishes closing
    /// once its pending transactions complete.
    async fn close(&self, handle: &IdbDatabase) -> EngineResult<()> {
        handle.close();
        Ok(())
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        tracing::debug!(name, "deleting IndexedDB database");
        idb::delete_database(name).await.map_err(EngineError::from)
    }
}
