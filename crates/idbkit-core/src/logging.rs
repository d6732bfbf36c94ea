//! Subscriber setup for native binaries and tests.
//!
//! Database diagnostics go through [`crate::TracingSink`] by default, so they
//! only show up once a subscriber is installed.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a compact subscriber filtered by `RUST_LOG`, defaulting to `info`.
pub fn init() {
    init_with_filter("info");
}

/// Install a compact subscriber with a custom default filter.
///
/// Does nothing if a global subscriber is already set.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}
