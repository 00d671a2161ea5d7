//! Immutable machine context.

use crate::value::DataValue;
use im::OrdMap;
use serde::{Deserialize, Serialize};

/// Immutable key/value data carried by a running machine.
///
/// `put` and `remove` return a new context and leave the receiver untouched.
/// Copies share structure, so cloning a context is cheap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    entries: OrdMap<String, DataValue>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.entries.get(key)
    }

    /// Returns a new context with `key` set to `value`.
    pub fn put(&self, key: impl Into<String>, value: impl Into<DataValue>) -> Context {
        Context {
            entries: self.entries.update(key.into(), value.into()),
        }
    }

    /// Returns a new context without `key`.
    pub fn remove(&self, key: &str) -> Context {
        Context {
            entries: self.entries.without(key),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.entries.iter()
    }
}

impl<K: Into<String>, V: Into<DataValue>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Context {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_put_returns_new_context() {
        let c1 = Context::new();
        let c2 = c1.put("k", DataValue::Int(1));

        assert!(c1.get("k").is_none());
        assert_eq!(c2.get("k"), Some(&DataValue::Int(1)));
    }

    #[test]
    fn test_overwrite_keeps_old_value_in_old_context() {
        let c1 = Context::new().put("k", "old");
        let c2 = c1.put("k", "new");

        assert_eq!(c1.get("k"), Some(&DataValue::from("old")));
        assert_eq!(c2.get("k"), Some(&DataValue::from("new")));
        assert_eq!(c2.len(), 1);
    }

    #[test]
    fn test_remove() {
        let c1: Context = [("a", 1), ("b", 2)].into_iter().collect();
        let c2 = c1.remove("a");

        assert!(c1.contains_key("a"));
        assert!(!c2.contains_key("a"));
        assert_eq!(c2.len(), 1);
    }

    #[test]
    fn test_serializes_as_object() {
        let ctx = Context::new().put("count", 2).put("name", "ada");
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json, serde_json::json!({"count": 2, "name": "ada"}));

        let back: Context = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }

    proptest! {
        #[test]
        fn prop_put_never_mutates_receiver(
            keys in proptest::collection::vec("[a-z]{1,4}", 1..16),
            probe in "[a-z]{1,4}",
            value in any::<i64>(),
        ) {
            let base: Context = keys.iter().map(|k| (k.clone(), DataValue::Int(0))).collect();
            let before = base.get(&probe).cloned();
            let updated = base.put(probe.clone(), DataValue::Long(value));

            prop_assert_eq!(base.get(&probe).cloned(), before);
            prop_assert_eq!(updated.get(&probe), Some(&DataValue::Long(value)));
        }
    }
}
