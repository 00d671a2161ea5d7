//! Events delivered to a machine.

use crate::value::DataValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event type used for the entry actions run when an engine starts.
pub const INIT_EVENT: &str = "init";

/// Prefix of the event synthesized when an invocation succeeds.
pub const DONE_INVOKE_PREFIX: &str = "done.invoke.";

/// Prefix of the event synthesized when an invocation fails.
pub const ERROR_INVOKE_PREFIX: &str = "error.invoke.";

/// A discrete occurrence sent to a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, DataValue>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: BTreeMap::new(),
        }
    }

    /// Adds one payload entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Replaces the payload.
    pub fn with_data(mut self, data: BTreeMap<String, DataValue>) -> Self {
        self.data = data;
        self
    }

    /// Event fed back when invocation `id` succeeds.
    pub fn done_invoke(id: &str, data: BTreeMap<String, DataValue>) -> Self {
        Self::new(format!("{}{}", DONE_INVOKE_PREFIX, id)).with_data(data)
    }

    /// Event fed back when invocation `id` fails.
    pub fn error_invoke(id: &str, data: BTreeMap<String, DataValue>) -> Self {
        Self::new(format!("{}{}", ERROR_INVOKE_PREFIX, id)).with_data(data)
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.data.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_event_types() {
        let done = Event::done_invoke("login", BTreeMap::new());
        assert_eq!(done.event_type, "done.invoke.login");

        let failed = Event::error_invoke("login", BTreeMap::new()).with("error", "bad password");
        assert_eq!(failed.event_type, "error.invoke.login");
        assert_eq!(failed.get("error"), Some(&DataValue::from("bad password")));
    }

    #[test]
    fn test_event_json_shape() {
        let event: Event =
            serde_json::from_str(r#"{"type": "SUBMIT", "data": {"user": "ada", "age": 36}}"#)
                .unwrap();
        assert_eq!(event.event_type, "SUBMIT");
        assert_eq!(event.get("age"), Some(&DataValue::Int(36)));

        let bare: Event = serde_json::from_str(r#"{"type": "RESET"}"#).unwrap();
        assert!(bare.data.is_empty());
        assert_eq!(
            serde_json::to_string(&bare).unwrap(),
            r#"{"type":"RESET"}"#
        );
    }
}
