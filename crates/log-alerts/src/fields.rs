// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dynamically typed log fields.
//!
//! A decoded log record is a map from field name to [`FieldValue`]. Consumers
//! never downcast blindly: each one goes through an explicit accessor that
//! returns `None` (or a typed error upstream) when the value has the wrong type.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

pub type FieldMap = HashMap<String, FieldValue>;

/// Field holding the routing metadata declared by the log producer.
pub const KVMETA_FIELD: &str = "_kvmeta";

/// Field holding the record's own timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Number(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    List(Vec<FieldValue>),
    Map(FieldMap),
    Null,
}

impl FieldValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Name of the variant, used in type mismatch errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::String(_) => "string",
            FieldValue::Number(_) => "number",
            FieldValue::Bool(_) => "bool",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
            FieldValue::Null => "null",
        }
    }

    /// Renders the value as a dimension string.
    ///
    /// Numbers lose their fractional part (3.2 => "3", truncated rather than
    /// rounded). Returns `None` for values that can't be used as a dimension.
    #[must_use]
    pub fn to_dimension(&self) -> Option<String> {
        match self {
            FieldValue::String(s) => Some(s.clone()),
            // adding 0.0 turns -0.0 into 0.0
            FieldValue::Number(n) => Some(format!("{}", n.trunc() + 0.0)),
            FieldValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(FieldValue::Null, FieldValue::Number),
            serde_json::Value::String(s) => FieldValue::String(s),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from_json).collect())
            }
            serde_json::Value::Object(obj) => FieldValue::Map(
                obj.into_iter()
                    .map(|(k, v)| (k, FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::String(s) => serde_json::Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Timestamp(t) => {
                serde_json::Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            FieldValue::List(l) => serde_json::Value::Array(l.iter().map(Self::to_json).collect()),
            FieldValue::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            FieldValue::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::String(s) => write!(f, "{s}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Timestamp(t) => {
                write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(t: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(t)
    }
}

/// Returns the string value of `key`, if present and a string.
#[must_use]
pub fn get_str<'a>(fields: &'a FieldMap, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(FieldValue::as_str)
}

/// Returns true if `key` is present and holds exactly the string `expected`.
#[must_use]
pub fn str_eq(fields: &FieldMap, key: &str, expected: &str) -> bool {
    get_str(fields, key) == Some(expected)
}
