use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::docstore::api::DocRef;
use crate::docstore::model::GeoPoint;
use crate::docstore::value::BytesValue;

/// Application-side value as authored by callers and returned in snapshots.
///
/// `Undefined` models an absent leaf. It never leaves the process: the
/// marshaller turns it into an explicit null before transmission.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Bytes(BytesValue),
    Date(DateTime<Utc>),
    GeoPoint(GeoPoint),
    Reference(DocRef),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Sentinel(Sentinel),
}

/// Write-only instruction asking the backend to compute the stored value.
#[derive(Clone, Debug, PartialEq)]
pub enum Sentinel {
    Delete,
    Increment(Box<Value>),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    ServerTimestamp,
}

impl Sentinel {
    pub fn name(&self) -> &'static str {
        match self {
            Sentinel::Delete => "delete",
            Sentinel::Increment(_) => "increment",
            Sentinel::ArrayUnion(_) => "arrayUnion",
            Sentinel::ArrayRemove(_) => "arrayRemove",
            Sentinel::ServerTimestamp => "serverTimestamp",
        }
    }
}

impl Value {
    /// Removes the field when used in an update or merge.
    pub fn delete() -> Self {
        Value::Sentinel(Sentinel::Delete)
    }

    pub fn increment(amount: impl Into<Value>) -> Self {
        Value::Sentinel(Sentinel::Increment(Box::new(amount.into())))
    }

    pub fn array_union<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Sentinel(Sentinel::ArrayUnion(
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn array_remove<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Sentinel(Sentinel::ArrayRemove(
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn server_timestamp() -> Self {
        Value::Sentinel(Sentinel::ServerTimestamp)
    }

    /// Builds a map value from `(key, value)` pairs.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Value::Sentinel(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Looks up a nested field by path segments.
    pub fn get_path<S: AsRef<str>>(&self, segments: &[S]) -> Option<&Value> {
        let (first, rest) = match segments.split_first() {
            Some(split) => split,
            None => return Some(self),
        };
        self.as_map()?.get(first.as_ref())?.get_path(rest)
    }

    /// Returns `true` when a sentinel appears anywhere in the tree.
    pub fn contains_sentinel(&self) -> bool {
        match self {
            Value::Sentinel(_) => true,
            Value::Array(values) => values.iter().any(Value::contains_sentinel),
            Value::Map(map) => map.values().any(Value::contains_sentinel),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Date(value)
    }
}

impl From<GeoPoint> for Value {
    fn from(value: GeoPoint) -> Self {
        Value::GeoPoint(value)
    }
}

impl From<BytesValue> for Value {
    fn from(value: BytesValue) -> Self {
        Value::Bytes(value)
    }
}

impl From<DocRef> for Value {
    fn from(value: DocRef) -> Self {
        Value::Reference(value)
    }
}

impl From<&DocRef> for Value {
    fn from(value: &DocRef) -> Self {
        Value::Reference(value.clone())
    }
}

impl From<Sentinel> for Value {
    fn from(value: Sentinel) -> Self {
        Value::Sentinel(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Undefined,
        }
    }
}
