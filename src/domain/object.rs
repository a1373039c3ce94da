//! Storage Object Handle
//!
//! The array returns loosely typed JSON objects. `StorageObject` keeps the
//! attribute bag but exposes checked accessors, so a type mismatch becomes
//! a descriptive [`Error::Decode`] instead of a panic.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized representation of a remote object (filesystem, LUN, share, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageObject(Map<String, Value>);

impl StorageObject {
    /// Decode a JSON value into a handle.
    ///
    /// Returns `Ok(None)` for `null`, an empty object, or an object without an
    /// `ID`, which is how the array reports "does not exist".
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) => {
                let obj = Self(map);
                match obj.get_string_or_default("ID") {
                    Ok(id) if !id.is_empty() => Ok(Some(obj)),
                    Ok(_) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            other => Err(Error::Decode {
                field: "data".into(),
                expected: "object",
                found: type_name(&other).into(),
            }),
        }
    }

    /// Decode a list response, skipping empty entries
    pub fn list_from_value(value: Value) -> Result<Vec<Self>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => {
                let mut objects = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(obj) = Self::from_value(item)? {
                        objects.push(obj);
                    }
                }
                Ok(objects)
            }
            other => Err(Error::Decode {
                field: "data".into(),
                expected: "array",
                found: type_name(&other).into(),
            }),
        }
    }

    /// Build a handle from field pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Object ID; empty only for handles built by hand
    pub fn id(&self) -> String {
        self.get_string_or_default("ID").unwrap_or_default()
    }

    pub fn name(&self) -> String {
        self.get_string_or_default("NAME").unwrap_or_default()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn raw(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Read a string field; numbers are rendered as strings
    pub fn get_string(&self, field: &str) -> Result<String> {
        match self.0.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(Error::Decode {
                field: field.into(),
                expected: "string",
                found: type_name(other).into(),
            }),
            None => Err(Error::Decode {
                field: field.into(),
                expected: "string",
                found: "nothing".into(),
            }),
        }
    }

    /// Like [`get_string`](Self::get_string) but absent/null yields `""`
    pub fn get_string_or_default(&self, field: &str) -> Result<String> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(_) => self.get_string(field),
        }
    }

    /// Read an integer field. The array sends numbers as JSON strings
    /// (`"CAPACITY": "2097152"`) as often as JSON numbers.
    pub fn get_i64(&self, field: &str) -> Result<i64> {
        let decode_err = |found: &str| Error::Decode {
            field: field.into(),
            expected: "integer",
            found: found.into(),
        };
        match self.0.get(field) {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| decode_err(&n.to_string())),
            Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| decode_err(s)),
            Some(other) => Err(decode_err(type_name(other))),
            None => Err(decode_err("nothing")),
        }
    }

    /// Read a boolean field, accepting `true` and `"true"`
    pub fn get_bool(&self, field: &str) -> Result<bool> {
        match self.0.get(field) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(other) => Err(Error::Decode {
                field: field.into(),
                expected: "bool",
                found: type_name(other).into(),
            }),
            None => Err(Error::Decode {
                field: field.into(),
                expected: "bool",
                found: "nothing".into(),
            }),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
