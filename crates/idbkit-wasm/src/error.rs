//! Rejection values handed to JS

use idbkit_core::{EngineError, Error};
use idbkit_indexeddb::IndexedDbError;
use wasm_bindgen::JsValue;

/// Convert a database error into the value a promise rejects with.
///
/// `Unavailable` rejects with `undefined`. Engine errors become an `Error` whose
/// `name` is the DOMException name, so callers can branch on
/// `err.name === "ConstraintError"`.
pub fn to_js(err: Error) -> JsValue {
    match err {
        Error::Unavailable => JsValue::UNDEFINED,
        Error::Engine(err) => engine_to_js(&err),
        Error::InvalidSchema(msg) => js_sys::TypeError::new(&msg).into(),
    }
}

pub fn engine_to_js(err: &EngineError) -> JsValue {
    let js = js_sys::Error::new(&err.message);
    js.set_name(err.name());
    js.into()
}

/// Bad arguments from JS (a value that is not a key, a record that is not JSON).
pub fn conversion_to_js(err: IndexedDbError) -> JsValue {
    engine_to_js(&EngineError::from(err))
}

pub fn type_error(msg: &str) -> JsValue {
    js_sys::TypeError::new(msg).into()
}
