//! Host values
//!
//! [`HostValue`] is the host-side half of every marshalling step: method
//! arguments and results, property values, and script field snapshots.

use std::collections::BTreeMap;
use std::fmt;

use crate::object::ObjectId;

/// A value as the host object model sees it
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    /// Absence of a value (also the result of resolving a freed object)
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Ordered list
    List(Vec<HostValue>),
    /// Key-value map with stringified keys
    Map(BTreeMap<String, HostValue>),
    /// Reference to a host object
    Object(ObjectId),
}

/// Discriminant of a [`HostValue`], used for expected-kind conversions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `HostValue::Nil`
    Nil,
    /// `HostValue::Bool`
    Bool,
    /// `HostValue::Int`
    Int,
    /// `HostValue::Float`
    Float,
    /// `HostValue::String`
    String,
    /// `HostValue::List`
    List,
    /// `HostValue::Map`
    Map,
    /// `HostValue::Object`
    Object,
}

impl ValueKind {
    /// Lowercase kind name
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl HostValue {
    /// Kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            HostValue::Nil => ValueKind::Nil,
            HostValue::Bool(_) => ValueKind::Bool,
            HostValue::Int(_) => ValueKind::Int,
            HostValue::Float(_) => ValueKind::Float,
            HostValue::String(_) => ValueKind::String,
            HostValue::List(_) => ValueKind::List,
            HostValue::Map(_) => ValueKind::Map,
            HostValue::Object(_) => ValueKind::Object,
        }
    }

    /// Check if this is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as float, widening integers
    pub fn as_float(&self) -> Option<f64> {
        match self {
            HostValue::Float(f) => Some(*f),
            HostValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as object id
    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            HostValue::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// Convert to JSON. Objects become their packed id.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            HostValue::Nil => Json::Null,
            HostValue::Bool(b) => Json::Bool(*b),
            HostValue::Int(i) => Json::from(*i),
            HostValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            HostValue::String(s) => Json::String(s.clone()),
            HostValue::List(items) => Json::Array(items.iter().map(HostValue::to_json).collect()),
            HostValue::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            HostValue::Object(id) => Json::from(id.to_bits()),
        }
    }
}

impl From<serde_json::Value> for HostValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => HostValue::Nil,
            Json::Bool(b) => HostValue::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => HostValue::Int(i),
                None => HostValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => HostValue::String(s),
            Json::Array(items) => HostValue::List(items.into_iter().map(HostValue::from).collect()),
            Json::Object(map) => HostValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, HostValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => f.write_str("nil"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Int(i) => write!(f, "{}", i),
            HostValue::Float(x) => write!(f, "{}", x),
            HostValue::String(s) => f.write_str(s),
            HostValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            HostValue::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            HostValue::Object(id) => write!(f, "[Object:{}]", id),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        HostValue::Int(i)
    }
}

impl From<i32> for HostValue {
    fn from(i: i32) -> Self {
        HostValue::Int(i as i64)
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        HostValue::Float(f)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<ObjectId> for HostValue {
    fn from(id: ObjectId) -> Self {
        HostValue::Object(id)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(items: Vec<HostValue>) -> Self {
        HostValue::List(items)
    }
}
