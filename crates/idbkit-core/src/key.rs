//! Engine keys, key ranges and queries
//!
//! Keys follow the IndexedDB key model: numbers, dates, strings, binary blobs and
//! arrays of keys, ordered Number < Date < String < Binary < Array.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::engine::EngineError;

/// A key addressing a record in a store or an entry in an index.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// Whether the engine accepts this key. NaN numbers and dates are not keys.
    pub fn is_valid(&self) -> bool {
        match self {
            Key::Number(n) | Key::Date(n) => !n.is_nan(),
            Key::Array(items) => items.iter().all(Key::is_valid),
            Key::String(_) | Key::Binary(_) => true,
        }
    }

    /// Extract a key from a JSON value.
    ///
    /// Returns `None` for values that are not valid keys (booleans, null, objects,
    /// or arrays containing any of those).
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_f64().map(Key::Number),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            Value::Null | Value::Bool(_) | Value::Object(_) => None,
        }
    }

    /// Render this key as a JSON value, e.g. to write a generated key into a record.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) | Key::Date(n) => number_value(*n),
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Integral numbers render without a fractional part so `{"id": 1}` stays `1`.
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Adding zero folds -0 into +0, which IndexedDB treats as one key.
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => {
                (a + 0.0).total_cmp(&(b + 0.0))
            }
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(ms) => write!(f, "Date({})", ms),
            Key::String(s) => f.write_str(s),
            Key::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
            Key::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

/// A contiguous interval of keys.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// Range containing exactly `key`.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// All keys above `lower` (excluding it when `open`).
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// All keys below `upper` (excluding it when `open`).
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(upper.into()),
            lower_open: false,
            upper_open: open,
        }
    }

    /// Keys between `lower` and `upper`.
    ///
    /// Fails with a `DataError` when `lower > upper`, or when both bounds are the
    /// same key and either end is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self, EngineError> {
        let lower = lower.into();
        let upper = upper.into();
        match lower.cmp(&upper) {
            Ordering::Greater => Err(EngineError::data("lower bound is greater than upper bound")),
            Ordering::Equal if lower_open || upper_open => Err(EngineError::data(
                "bounds are equal and one of them is open",
            )),
            _ => Ok(Self {
                lower: Some(lower),
                upper: Some(upper),
                lower_open,
                upper_open,
            }),
        }
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    pub fn contains(&self, key: &Key) -> bool {
        if let Some(lower) = &self.lower {
            match key.cmp(lower) {
                Ordering::Less => return false,
                Ordering::Equal if self.lower_open => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match key.cmp(upper) {
                Ordering::Greater => return false,
                Ordering::Equal if self.upper_open => return false,
                _ => {}
            }
        }
        true
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.lower_open { "(" } else { "[" })?;
        if let Some(lower) = &self.lower {
            write!(f, "{}", lower)?;
        }
        f.write_str("..")?;
        if let Some(upper) = &self.upper {
            write!(f, "{}", upper)?;
        }
        f.write_str(if self.upper_open { ")" } else { "]" })
    }
}

/// A single key or a key range, accepted wherever the engine takes a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Key(Key),
    Range(KeyRange),
}

impl Query {
    pub fn matches(&self, key: &Key) -> bool {
        match self {
            Query::Key(k) => k == key,
            Query::Range(range) => range.contains(key),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Query::Key(k) => k.is_valid(),
            Query::Range(range) => {
                range.lower.as_ref().map_or(true, Key::is_valid)
                    && range.upper.as_ref().map_or(true, Key::is_valid)
            }
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Key(k) => write!(f, "{}", k),
            Query::Range(range) => write!(f, "{}", range),
        }
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

macro_rules! query_from_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Query {
                fn from(key: $ty) -> Self {
                    Query::Key(key.into())
                }
            }
        )*
    };
}

query_from_key!(Key, f64, i32, i64, u32, u64, &str, String, Vec<Key>);
