//! Schema changes inside a versionchange transaction

use idbkit_core::{EngineResult, IndexOptions, KeyPath, StoreOptions, UpgradeContext};
use js_sys::Array;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    IdbDatabase, IdbIndexParameters, IdbObjectStoreParameters, IdbOpenDbRequest, IdbTransaction,
};

use crate::error::{IndexedDbError, Result};

fn key_path_to_js(path: &KeyPath) -> JsValue {
    match path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Compound(paths) => paths
            .iter()
            .map(|p| JsValue::from_str(p))
            .collect::<Array>()
            .into(),
    }
}

fn set_prop(target: &JsValue, key: &str, value: &JsValue) -> Result<()> {
    js_sys::Reflect::set(target, &JsValue::from_str(key), value)?;
    Ok(())
}

/// The database and transaction handed to `onupgradeneeded`.
pub(crate) struct UpgradeTransaction {
    db: IdbDatabase,
    tx: IdbTransaction,
}

impl UpgradeTransaction {
    pub(crate) fn from_request(req: &IdbOpenDbRequest) -> Result<Self> {
        let db = req
            .result()?
            .dyn_into::<IdbDatabase>()
            .map_err(|_| IndexedDbError::JsValue("upgrade result is not IdbDatabase".into()))?;
        let tx = req.transaction().ok_or_else(|| {
            IndexedDbError::dom("InvalidStateError", "no versionchange transaction")
        })?;
        Ok(Self { db, tx })
    }

    fn create_store_inner(&self, name: &str, options: &StoreOptions) -> Result<()> {
        let params = IdbObjectStoreParameters::new();
        if let Some(path) = &options.key_path {
            set_prop(&params, "keyPath", &key_path_to_js(path))?;
        }
        if options.auto_increment {
            set_prop(&params, "autoIncrement", &JsValue::TRUE)?;
        }
        self.db
            .create_object_store_with_optional_parameters(name, &params)?;
        Ok(())
    }

    fn create_index_inner(
        &self,
        store: &str,
        name: &str,
        key_path: &KeyPath,
        options: &IndexOptions,
    ) -> Result<()> {
        let params = IdbIndexParameters::new();
        set_prop(&params, "unique", &JsValue::from_bool(options.unique))?;
        set_prop(&params, "multiEntry", &JsValue::from_bool(options.multi_entry))?;

        let store = self.tx.object_store(store)?;
        match key_path {
            KeyPath::Single(path) => {
                store.create_index_with_str_and_optional_parameters(name, path, &params)?
            }
            KeyPath::Compound(_) => store.create_index_with_str_sequence_and_optional_parameters(
                name,
                &key_path_to_js(key_path),
                &params,
            )?,
        };
        Ok(())
    }
}

impl UpgradeContext for UpgradeTransaction {
    fn store_names(&self) -> Vec<String> {
        let list = self.db.object_store_names();
        let mut names: Vec<String> = (0..list.length()).filter_map(|i| list.item(i)).collect();
        names.sort();
        names
    }

    fn has_store(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn create_store(&mut self, name: &str, options: &StoreOptions) -> EngineResult<()> {
        tracing::debug!(store = name, "creating object store");
        Ok(self.create_store_inner(name, options)?)
    }

    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: &KeyPath,
        options: &IndexOptions,
    ) -> EngineResult<()> {
        tracing::debug!(store, index = name, "creating index");
        Ok(self.create_index_inner(store, name, key_path, options)?)
    }
}
