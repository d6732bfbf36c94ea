//! idbkit browser bindings
//!
//! Exposes the promise-style database to JS:
//!
//! - `IndexDb`: lifecycle (`init`, `close`, `deleteDB`) and every store operation
//! - `Table`: the same operations scoped to one store
//! - `CustomLog`: the color-coded console logger used for diagnostics
//!
//! Operations reject with an `Error` whose `name` is the IndexedDB
//! DOMException name, or with `undefined` when the database is not open.

pub mod console;
pub mod database;
pub mod error;

pub use console::{ConsoleLogger, ConsoleSink};
pub use database::{IndexDb, Table};
