//! Conversions between idbkit values and JS values
//!
//! Records cross the boundary as JSON text (`JSON.stringify` / `JSON.parse`), so
//! they come back exactly as `serde_json` sees them. Keys are mapped structurally:
//! numbers, `Date`s, strings, `ArrayBuffer`s and arrays.

use idbkit_core::{Key, KeyRange, Query};
use js_sys::{Array, ArrayBuffer, Date, Uint8Array};
use serde_json::Value;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::IdbKeyRange;

use crate::error::{IndexedDbError, Result};

pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::Date(ms) => Date::new(&JsValue::from_f64(*ms)).into(),
        Key::String(s) => JsValue::from_str(s),
        Key::Binary(bytes) => Uint8Array::from(bytes.as_slice()).buffer().into(),
        Key::Array(items) => items.iter().map(key_to_js).collect::<Array>().into(),
    }
}

pub fn key_from_js(value: &JsValue) -> Result<Key> {
    if let Some(n) = value.as_f64() {
        return Ok(Key::Number(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(Key::String(s));
    }
    if let Some(date) = value.dyn_ref::<Date>() {
        return Ok(Key::Date(date.get_time()));
    }
    if let Some(buffer) = value.dyn_ref::<ArrayBuffer>() {
        return Ok(Key::Binary(Uint8Array::new(buffer).to_vec()));
    }
    if Array::is_array(value) {
        return Array::from(value)
            .iter()
            .map(|item| key_from_js(&item))
            .collect::<Result<Vec<_>>>()
            .map(Key::Array);
    }
    Err(IndexedDbError::JsValue(format!("{:?} is not a valid key", value)))
}

/// `undefined` (no match) maps to `None`.
pub fn optional_key_from_js(value: &JsValue) -> Result<Option<Key>> {
    if value.is_undefined() {
        return Ok(None);
    }
    key_from_js(value).map(Some)
}

pub fn keys_from_js(value: &JsValue) -> Result<Vec<Key>> {
    Array::from(value)
        .iter()
        .map(|item| key_from_js(&item))
        .collect()
}

pub fn value_to_js(value: &Value) -> Result<JsValue> {
    let text = serde_json::to_string(value)?;
    js_sys::JSON::parse(&text).map_err(IndexedDbError::from)
}

pub fn value_from_js(value: &JsValue) -> Result<Value> {
    if value.is_undefined() {
        return Ok(Value::Null);
    }
    let text = js_sys::JSON::stringify(value).map_err(IndexedDbError::from)?;
    Ok(serde_json::from_str(&String::from(text))?)
}

/// `undefined` (no match) maps to `None`.
pub fn record_from_js(value: &JsValue) -> Result<Option<Value>> {
    if value.is_undefined() {
        return Ok(None);
    }
    value_from_js(value).map(Some)
}

pub fn records_from_js(value: &JsValue) -> Result<Vec<Value>> {
    Array::from(value)
        .iter()
        .map(|item| value_from_js(&item))
        .collect()
}

pub fn range_to_js(range: &KeyRange) -> Result<IdbKeyRange> {
    let (lower_open, upper_open) = (range.lower_open(), range.upper_open());
    let range = match (range.lower(), range.upper()) {
        (Some(lower), Some(upper)) if lower == upper && !lower_open && !upper_open => {
            IdbKeyRange::only(&key_to_js(lower))
        }
        (Some(lower), Some(upper)) => IdbKeyRange::bound_with_lower_open_and_upper_open(
            &key_to_js(lower),
            &key_to_js(upper),
            lower_open,
            upper_open,
        ),
        (Some(lower), None) => IdbKeyRange::lower_bound_with_open(&key_to_js(lower), lower_open),
        (None, Some(upper)) => IdbKeyRange::upper_bound_with_open(&key_to_js(upper), upper_open),
        (None, None) => return Err(IndexedDbError::dom("DataError", "key range has no bounds")),
    };
    range.map_err(IndexedDbError::from)
}

pub fn query_to_js(query: &Query) -> Result<JsValue> {
    match query {
        Query::Key(key) => Ok(key_to_js(key)),
        Query::Range(range) => range_to_js(range).map(JsValue::from),
    }
}

/// `None` maps to `undefined`, which IndexedDB reads as "every key".
pub fn optional_query_to_js(query: Option<&Query>) -> Result<JsValue> {
    query.map_or(Ok(JsValue::UNDEFINED), query_to_js)
}

pub fn range_from_js(range: &IdbKeyRange) -> Result<KeyRange> {
    let bound = |value: JsValue| -> Result<Option<Key>> {
        if value.is_undefined() {
            Ok(None)
        } else {
            key_from_js(&value).map(Some)
        }
    };
    let lower = bound(range.lower()?)?;
    let upper = bound(range.upper()?)?;
    let (lower_open, upper_open) = (range.lower_open(), range.upper_open());
    match (lower, upper) {
        (Some(lower), Some(upper)) => KeyRange::bound(lower, upper, lower_open, upper_open)
            .map_err(|err| IndexedDbError::dom(err.name(), err.message.clone())),
        (Some(lower), None) => Ok(KeyRange::lower_bound(lower, lower_open)),
        (None, Some(upper)) => Ok(KeyRange::upper_bound(upper, upper_open)),
        (None, None) => Err(IndexedDbError::dom("DataError", "key range has no bounds")),
    }
}

/// A key or an `IDBKeyRange`; `undefined` and `null` map to `None`.
pub fn query_from_js(value: &JsValue) -> Result<Option<Query>> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    if let Some(range) = value.dyn_ref::<IdbKeyRange>() {
        return range_from_js(range).map(|r| Some(Query::Range(r)));
    }
    key_from_js(value).map(|k| Some(Query::Key(k)))
}
