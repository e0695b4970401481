use bytes::Bytes;
use serde_json::{Map, Number};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A single argument of an event or acknowledgement. Mirrors JSON with an
/// extra variant for binary data, which travels as a separate attachment.
#[derive(Debug, PartialEq, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Binary(Bytes),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(string) => Some(string),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(number) => number.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether the value holds binary data at any depth.
    pub fn has_binary(&self) -> bool {
        match self {
            Value::Binary(_) => true,
            Value::Array(values) => values.iter().any(Value::has_binary),
            Value::Object(map) => map.values().any(Value::has_binary),
            _ => false,
        }
    }

    /// Converts to json, moving binary data into `attachments` and leaving
    /// placeholders behind. Attachments are numbered depth first.
    pub(crate) fn into_json(self, attachments: &mut Vec<Bytes>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(number) => serde_json::Value::Number(number),
            Value::String(string) => serde_json::Value::String(string),
            Value::Binary(bytes) => {
                let num = attachments.len();
                attachments.push(bytes);
                serde_json::json!({ "_placeholder": true, "num": num })
            }
            Value::Array(values) => serde_json::Value::Array(
                values
                    .into_iter()
                    .map(|value| value.into_json(attachments))
                    .collect(),
            ),
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, value.into_json(attachments)))
                    .collect::<Map<_, _>>(),
            ),
        }
    }

    /// Converts from json, replacing placeholders with their attachment.
    pub(crate) fn from_json(json: serde_json::Value, attachments: &[Bytes]) -> Result<Value> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(number) => Value::Number(number),
            serde_json::Value::String(string) => Value::String(string),
            serde_json::Value::Array(values) => Value::Array(
                values
                    .into_iter()
                    .map(|value| Value::from_json(value, attachments))
                    .collect::<Result<_>>()?,
            ),
            serde_json::Value::Object(map) => match placeholder_num(&map) {
                Some(num) => usize::try_from(num)
                    .ok()
                    .and_then(|index| attachments.get(index))
                    .map(|bytes| Value::Binary(bytes.clone()))
                    .ok_or(Error::InvalidPlaceholder(num))?,
                None => Value::Object(
                    map.into_iter()
                        .map(|(key, value)| {
                            Value::from_json(value, attachments).map(|value| (key, value))
                        })
                        .collect::<Result<_>>()?,
                ),
            },
        })
    }
}

fn placeholder_num(map: &Map<String, serde_json::Value>) -> Option<u64> {
    match map.get("_placeholder") {
        Some(serde_json::Value::Bool(true)) => map.get("num").and_then(serde_json::Value::as_u64),
        _ => None,
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(number) => Value::Number(number),
            serde_json::Value::String(string) => Value::String(string),
            serde_json::Value::Array(values) => {
                Value::Array(values.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(string: &str) -> Self {
        Self::String(string.to_owned())
    }
}

impl From<String> for Value {
    fn from(string: String) -> Self {
        Self::String(string)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(number: i32) -> Self {
        Self::Number(number.into())
    }
}

impl From<i64> for Value {
    fn from(number: i64) -> Self {
        Self::Number(number.into())
    }
}

impl From<u32> for Value {
    fn from(number: u32) -> Self {
        Self::Number(number.into())
    }
}

impl From<u64> for Value {
    fn from(number: u64) -> Self {
        Self::Number(number.into())
    }
}

impl From<f64> for Value {
    /// Non finite numbers have no json representation and become `Null`.
    fn from(number: f64) -> Self {
        Number::from_f64(number).map_or(Self::Null, Self::Number)
    }
}

impl From<Vec<u8>> for Value {
    fn from(val: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(val))
    }
}

impl From<&'static [u8]> for Value {
    fn from(val: &'static [u8]) -> Self {
        Self::Binary(Bytes::from_static(val))
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::Array(values)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(option: Option<T>) -> Self {
        option.map_or(Self::Null, Into::into)
    }
}
