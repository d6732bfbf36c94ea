//! Color-coded browser console logger
//!
//! Each line renders as two capsules: the label on a dark slate background,
//! then the message on the level's color.

use idbkit_core::{DiagnosticSink, Level};
use wasm_bindgen::prelude::*;

const LABEL_COLOR: &str = "#35495E";

pub fn level_color(level: Level) -> &'static str {
    match level {
        Level::Default => "#35495E",
        Level::Primary => "#3488ff",
        Level::Success => "#43B883",
        Level::Warning => "#e6a23c",
        Level::Danger => "#f56c6c",
    }
}

fn capsule_css(background: &str, radius: &str) -> String {
    format!(
        "background:{}; border-radius:{}; padding:1px 4px; color:#fff",
        background, radius
    )
}

/// `%c` directives for `console.log`. A literal `%` in the text is doubled so
/// it is not read as a format specifier.
fn format_line(label: &str, message: &str) -> String {
    format!(
        "%c {} %c {} ",
        label.replace('%', "%%"),
        message.replace('%', "%%")
    )
}

fn log(label: &str, level: Level, message: &str) {
    web_sys::console::log_3(
        &JsValue::from_str(&format_line(label, message)),
        &JsValue::from_str(&capsule_css(LABEL_COLOR, "3px 0 0 3px")),
        &JsValue::from_str(&capsule_css(level_color(level), "0 3px 3px 0")),
    );
}

/// Diagnostic sink that writes to the browser console.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl DiagnosticSink for ConsoleSink {
    fn emit(&self, label: &str, level: Level, message: &str) {
        log(label, level, message);
    }
}

/// The same console logger, for use from JS: `new CustomLog("DB").success("ok")`.
#[wasm_bindgen(js_name = CustomLog)]
pub struct ConsoleLogger {
    label: String,
}

#[wasm_bindgen(js_class = CustomLog)]
impl ConsoleLogger {
    #[wasm_bindgen(constructor)]
    pub fn new(label: String) -> ConsoleLogger {
        ConsoleLogger { label }
    }

    #[wasm_bindgen(js_name = default)]
    pub fn default_level(&self, message: &str) {
        log(&self.label, Level::Default, message);
    }

    pub fn primary(&self, message: &str) {
        log(&self.label, Level::Primary, message);
    }

    pub fn success(&self, message: &str) {
        log(&self.label, Level::Success, message);
    }

    pub fn warning(&self, message: &str) {
        log(&self.label, Level::Warning, message);
    }

    pub fn danger(&self, message: &str) {
        log(&self.label, Level::Danger, message);
    }
}
