//! Typed values exchanged by the key-value and SQL sub-protocols.
//!
//! On the wire every value is a two field object, `{"type": tag, "value": ...}`.
//!
//! | tag          | value                                         |
//! |--------------|-----------------------------------------------|
//! | `string`     | JSON string                                   |
//! | `int`        | JSON integer (i64)                            |
//! | `double`     | JSON number                                   |
//! | `datetime`   | JSON integer, milliseconds since the epoch    |
//! | `binary`     | JSON string, padded standard base64           |
//! | `bool`       | JSON boolean                                  |
//! | `stringlist` | JSON array of strings                         |
use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use serde_json::Value;

/// Discriminant of a [`ValueWithType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Int,
    Double,
    #[serde(rename = "datetime")]
    DateTime,
    Binary,
    Bool,
    #[serde(rename = "stringlist")]
    StringList,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueWithType {
    String(String),
    Int(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    Binary(Vec<u8>),
    Bool(bool),
    StringList(Vec<String>),
}

#[derive(Serialize, Deserialize)]
struct WireValue {
    #[serde(rename = "type")]
    kind: ValueType,
    value: Value,
}

impl ValueWithType {
    pub fn value_type(&self) -> ValueType {
        match self {
            ValueWithType::String(_) => ValueType::String,
            ValueWithType::Int(_) => ValueType::Int,
            ValueWithType::Double(_) => ValueType::Double,
            ValueWithType::DateTime(_) => ValueType::DateTime,
            ValueWithType::Binary(_) => ValueType::Binary,
            ValueWithType::Bool(_) => ValueType::Bool,
            ValueWithType::StringList(_) => ValueType::StringList,
        }
    }

    fn to_wire(&self) -> WireValue {
        let value = match self {
            ValueWithType::String(s) => Value::from(s.as_str()),
            ValueWithType::Int(i) | ValueWithType::DateTime(i) => Value::from(*i),
            ValueWithType::Double(d) => Value::from(*d),
            ValueWithType::Binary(bytes) => Value::from(STANDARD.encode(bytes)),
            ValueWithType::Bool(b) => Value::from(*b),
            ValueWithType::StringList(list) => Value::from(list.clone()),
        };
        WireValue {
            kind: self.value_type(),
            value,
        }
    }

    fn from_wire(wire: WireValue) -> Result<Self, String> {
        let WireValue { kind, value } = wire;
        let mismatch = || format!("value {value} does not match type {kind:?}");
        let decoded = match kind {
            ValueType::String => ValueWithType::String(value.as_str().ok_or_else(mismatch)?.into()),
            ValueType::Int => ValueWithType::Int(value.as_i64().ok_or_else(mismatch)?),
            ValueType::Double => ValueWithType::Double(value.as_f64().ok_or_else(mismatch)?),
            ValueType::DateTime => ValueWithType::DateTime(value.as_i64().ok_or_else(mismatch)?),
            ValueType::Bool => ValueWithType::Bool(value.as_bool().ok_or_else(mismatch)?),
            ValueType::Binary => {
                let encoded = value.as_str().ok_or_else(mismatch)?;
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| format!("invalid base64 in binary value: {e}"))?;
                ValueWithType::Binary(bytes)
            }
            ValueType::StringList => {
                let items = value.as_array().ok_or_else(mismatch)?;
                let list = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(mismatch)?;
                ValueWithType::StringList(list)
            }
        };
        Ok(decoded)
    }
}

impl Serialize for ValueWithType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ValueWithType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireValue::deserialize(deserializer)?;
        ValueWithType::from_wire(wire).map_err(de::Error::custom)
    }
}

impl fmt::Display for ValueWithType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueWithType::String(s) => write!(f, "{s:?}"),
            ValueWithType::Int(i) => write!(f, "{i}"),
            ValueWithType::Double(d) => write!(f, "{d}"),
            ValueWithType::DateTime(ms) => match chrono::DateTime::from_timestamp_millis(*ms) {
                Some(at) => write!(f, "{}", at.to_rfc3339()),
                None => write!(f, "{ms}ms"),
            },
            ValueWithType::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            ValueWithType::Bool(b) => write!(f, "{b}"),
            ValueWithType::StringList(list) => write!(f, "{list:?}"),
        }
    }
}
