//! Typed data values.
//!
//! `DataValue` is the single value representation used by contexts, events,
//! guards and invocations. Numeric variants form one comparable family and
//! compare by widening to `f64`. Comparing across families (e.g. a string with
//! a number) is an error rather than `false`.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A value held in a context or carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum DataValue {
    String(String),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Object(BTreeMap<String, DataValue>),
    List(Vec<DataValue>),
}

impl DataValue {
    /// Returns the variant name, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::Int(_) => "int",
            DataValue::Long(_) => "long",
            DataValue::Float(_) => "float",
            DataValue::Double(_) => "double",
            DataValue::Bool(_) => "bool",
            DataValue::Object(_) => "object",
            DataValue::List(_) => "list",
        }
    }

    /// Widens a numeric value to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Int(v) => Some(f64::from(*v)),
            DataValue::Long(v) => Some(*v as f64),
            DataValue::Float(v) => Some(f64::from(*v)),
            DataValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, DataValue>> {
        match self {
            DataValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Orders two values.
    ///
    /// Numbers compare by widening, booleans order false < true and strings
    /// compare by code point. Any other pairing is not comparable.
    pub fn compare(&self, other: &DataValue) -> Result<Ordering, CoreError> {
        match (self, other) {
            (DataValue::String(a), DataValue::String(b)) => Ok(a.cmp(b)),
            (DataValue::Bool(a), DataValue::Bool(b)) => Ok(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                x.partial_cmp(&y).ok_or_else(|| not_comparable(a, b))
            }
            (a, b) => Err(not_comparable(a, b)),
        }
    }

    /// Tests two values for equality under the same rules as [`compare`].
    ///
    /// Objects and lists are additionally equal when they match member by
    /// member. Cross-family pairs are an error.
    ///
    /// [`compare`]: DataValue::compare
    pub fn equals(&self, other: &DataValue) -> Result<bool, CoreError> {
        match (self, other) {
            (DataValue::Object(a), DataValue::Object(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, left) in a {
                    match b.get(key) {
                        Some(right) if left.equals(right)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (DataValue::List(a), DataValue::List(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (left, right) in a.iter().zip(b) {
                    if !left.equals(right)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => self.compare(other).map(|ord| ord == Ordering::Equal),
        }
    }
}

fn not_comparable(a: &DataValue, b: &DataValue) -> CoreError {
    CoreError::GuardEvaluation {
        reason: format!("cannot compare {} ({}) with {} ({})", a.kind(), a, b.kind(), b),
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::String(s) => write!(f, "\"{}\"", s),
            DataValue::Int(v) => write!(f, "{}", v),
            DataValue::Long(v) => write!(f, "{}", v),
            DataValue::Float(v) => write!(f, "{}", v),
            DataValue::Double(v) => write!(f, "{}", v),
            DataValue::Bool(v) => write!(f, "{}", v),
            DataValue::Object(_) | DataValue::List(_) => {
                write!(f, "{}", Value::from(self.clone()))
            }
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::String(s)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        DataValue::Int(v)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Long(v)
    }
}

impl From<f32> for DataValue {
    fn from(v: f32) -> Self {
        DataValue::Float(v)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Double(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Bool(v)
    }
}

impl From<BTreeMap<String, DataValue>> for DataValue {
    fn from(map: BTreeMap<String, DataValue>) -> Self {
        DataValue::Object(map)
    }
}

impl From<Vec<DataValue>> for DataValue {
    fn from(list: Vec<DataValue>) -> Self {
        DataValue::List(list)
    }
}

impl TryFrom<Value> for DataValue {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Err(CoreError::InvalidValue {
                reason: "null is not a data value".to_string(),
            }),
            Value::Bool(b) => Ok(DataValue::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(i32::try_from(i)
                        .map(DataValue::Int)
                        .unwrap_or(DataValue::Long(i)))
                } else if let Some(f) = n.as_f64() {
                    Ok(DataValue::Double(f))
                } else {
                    Err(CoreError::InvalidValue {
                        reason: format!("number out of range: {}", n),
                    })
                }
            }
            Value::String(s) => Ok(DataValue::String(s)),
            Value::Array(items) => items
                .into_iter()
                .map(DataValue::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(DataValue::List),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| DataValue::try_from(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(DataValue::Object),
        }
    }
}

impl From<DataValue> for Value {
    fn from(value: DataValue) -> Self {
        match value {
            DataValue::String(s) => Value::String(s),
            DataValue::Int(v) => Value::from(v),
            DataValue::Long(v) => Value::from(v),
            DataValue::Float(v) => serde_json::Number::from_f64(f64::from(v))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            DataValue::Double(v) => serde_json::Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            DataValue::Bool(v) => Value::Bool(v),
            DataValue::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
            DataValue::List(items) => Value::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_numeric_cross_type_comparison() {
        let long = DataValue::Long(100);
        let double = DataValue::Double(100.5);
        assert_eq!(long.compare(&double).unwrap(), Ordering::Less);
        assert_eq!(double.compare(&long).unwrap(), Ordering::Greater);

        assert!(DataValue::Int(3).equals(&DataValue::Double(3.0)).unwrap());
        assert!(DataValue::Float(0.5).equals(&DataValue::Double(0.5)).unwrap());
    }

    #[test]
    fn test_cross_family_is_error_both_directions() {
        let s = DataValue::from("x");
        let b = DataValue::Bool(true);
        assert!(matches!(
            s.compare(&b),
            Err(CoreError::GuardEvaluation { .. })
        ));
        assert!(matches!(
            b.compare(&s),
            Err(CoreError::GuardEvaluation { .. })
        ));
        assert!(s.equals(&DataValue::Int(1)).is_err());
    }

    #[test]
    fn test_bool_and_string_ordering() {
        assert_eq!(
            DataValue::Bool(false).compare(&DataValue::Bool(true)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            DataValue::from("apple").compare(&DataValue::from("banana")).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            DataValue::from("Z").compare(&DataValue::from("a")).unwrap(),
            Ordering::Less
        );
    }

    #[test]
    fn test_nan_is_not_comparable() {
        let nan = DataValue::Double(f64::NAN);
        assert!(nan.compare(&DataValue::Int(1)).is_err());
    }

    #[test]
    fn test_structural_equality() {
        let a = DataValue::try_from(json!({"user": {"id": 1, "tags": ["a", "b"]}})).unwrap();
        let b = DataValue::try_from(json!({"user": {"id": 1.0, "tags": ["a", "b"]}})).unwrap();
        let c = DataValue::try_from(json!({"user": {"id": 2, "tags": ["a", "b"]}})).unwrap();
        assert!(a.equals(&b).unwrap());
        assert!(!a.equals(&c).unwrap());
        assert!(a.compare(&b).is_err());
    }

    #[test]
    fn test_json_conversion() {
        let value = DataValue::try_from(json!({
            "small": 7,
            "big": 10_000_000_000i64,
            "ratio": 0.25,
            "name": "ada",
            "ok": true
        }))
        .unwrap();
        let map = value.as_object().unwrap();
        assert_eq!(map["small"], DataValue::Int(7));
        assert_eq!(map["big"], DataValue::Long(10_000_000_000));
        assert_eq!(map["ratio"], DataValue::Double(0.25));
        assert_eq!(map["name"], DataValue::from("ada"));
        assert_eq!(map["ok"], DataValue::Bool(true));

        assert!(DataValue::try_from(json!(null)).is_err());
        assert!(DataValue::try_from(json!([1, null])).is_err());
    }

    #[test]
    fn test_serde_uses_plain_json() {
        let value = DataValue::List(vec![DataValue::Int(1), DataValue::from("two")]);
        assert_eq!(serde_json::to_value(&value).unwrap(), json!([1, "two"]));

        let parsed: DataValue = serde_json::from_str(r#"{"n": 3}"#).unwrap();
        assert_eq!(
            parsed.as_object().unwrap().get("n"),
            Some(&DataValue::Int(3))
        );
    }

    proptest! {
        #[test]
        fn prop_numeric_compare_matches_f64(a in -1_000_000i64..1_000_000, b in -1_000_000.0f64..1_000_000.0) {
            let ord = DataValue::Long(a).compare(&DataValue::Double(b)).unwrap();
            prop_assert_eq!(Some(ord), (a as f64).partial_cmp(&b));
            let reversed = DataValue::Double(b).compare(&DataValue::Long(a)).unwrap();
            prop_assert_eq!(reversed, ord.reverse());
        }
    }
}
