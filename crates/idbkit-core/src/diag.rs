//! Leveled diagnostics
//!
//! Operations report what they did to an optional [`DiagnosticSink`] when the
//! debug flag is on. Sinks only observe; nothing they do feeds back into results.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Diagnostic severity, in the palette of a colored console logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Default,
    Primary,
    Success,
    Warning,
    Danger,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Default => "default",
            Level::Primary => "primary",
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Danger => "danger",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver for labeled, leveled messages.
pub trait DiagnosticSink {
    fn emit(&self, label: &str, level: Level, message: &str);
}

/// Forwards diagnostics to `tracing`.
///
/// Danger maps to `error`, warning to `warn`, primary and success to `info`,
/// default to `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, label: &str, level: Level, message: &str) {
        match level {
            Level::Danger => tracing::error!(label, level = level.as_str(), "{}", message),
            Level::Warning => tracing::warn!(label, level = level.as_str(), "{}", message),
            Level::Primary | Level::Success => {
                tracing::info!(label, level = level.as_str(), "{}", message)
            }
            Level::Default => tracing::debug!(label, level = level.as_str(), "{}", message),
        }
    }
}

/// Label attached to every database diagnostic.
pub const LABEL: &str = "DB";

/// Gate in front of a sink: messages pass only when a sink is set and the debug
/// flag is on.
#[derive(Clone)]
pub(crate) struct Diagnostics {
    sink: Option<Rc<dyn DiagnosticSink>>,
    enabled: Cell<bool>,
}

impl Diagnostics {
    pub(crate) fn new(sink: Option<Rc<dyn DiagnosticSink>>) -> Self {
        Self {
            sink,
            enabled: Cell::new(false),
        }
    }

    pub(crate) fn set_sink(&mut self, sink: Option<Rc<dyn DiagnosticSink>>) {
        self.sink = sink;
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Message built lazily so disabled diagnostics cost nothing.
    pub(crate) fn emit(&self, level: Level, message: impl FnOnce() -> String) {
        if !self.enabled.get() {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.emit(LABEL, level, &message());
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sink", &self.sink.is_some())
            .field("enabled", &self.enabled.get())
            .finish()
    }
}
