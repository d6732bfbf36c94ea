//! Initialization options
//!
//! Deserializes from the object browser callers pass to `init`, e.g.
//! `{ "debug": true, "recovery": "deleteAndReopen" }`. Missing fields take their
//! defaults.

use serde::{Deserialize, Serialize};

/// What to do when opening the database fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Recovery {
    /// Report the failure and leave the database alone.
    #[default]
    Disabled,
    /// Report the failure, then delete the database and open it once more from
    /// scratch. Destroys all stored data.
    DeleteAndReopen,
}

/// Options for [`crate::Database::initialize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InitOptions {
    /// Emit diagnostics for every operation.
    pub debug: bool,
    pub recovery: Recovery,
    /// Make count and listing operations return engine errors instead of
    /// defaulting to zero or an empty list.
    pub strict_aggregates: bool,
}

impl InitOptions {
    pub fn debug() -> Self {
        Self {
            debug: true,
            ..Self::default()
        }
    }

    pub fn with_recovery(mut self, recovery: Recovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_strict_aggregates(mut self, strict: bool) -> Self {
        self.strict_aggregates = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = InitOptions::default();
        assert!(!options.debug);
        assert_eq!(options.recovery, Recovery::Disabled);
        assert!(!options.strict_aggregates);
    }

    #[test]
    fn test_deserialize_partial() {
        let options: InitOptions = serde_json::from_value(json!({ "debug": true })).unwrap();
        assert_eq!(options, InitOptions::debug());

        let options: InitOptions = serde_json::from_value(json!({
            "recovery": "deleteAndReopen",
            "strictAggregates": true
        }))
        .unwrap();
        assert_eq!(options.recovery, Recovery::DeleteAndReopen);
        assert!(options.strict_aggregates);
    }
}
