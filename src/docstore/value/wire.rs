use std::collections::BTreeMap;

use serde_json::{json, Value as JsonValue};

use crate::docstore::model::{GeoPoint, Timestamp};
use crate::docstore::value::BytesValue;

/// Document fields in backend wire form.
pub type WireMap = BTreeMap<String, WireValue>;

/// Backend-native value produced by the marshaller.
#[derive(Clone, Debug, PartialEq)]
pub struct WireValue {
    kind: WireKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WireKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(Timestamp),
    String(String),
    Bytes(BytesValue),
    /// Fully qualified document name.
    Reference(String),
    GeoPoint(GeoPoint),
    Array(Vec<WireValue>),
    Map(WireMap),
    Operation(FieldOperation),
}

/// Backend-native operation object a sentinel is translated into.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldOperation {
    Delete,
    Increment(Box<WireValue>),
    ArrayUnion(Vec<WireValue>),
    ArrayRemove(Vec<WireValue>),
    ServerTimestamp,
}

impl WireValue {
    pub fn new(kind: WireKind) -> Self {
        Self { kind }
    }

    pub fn null() -> Self {
        Self::new(WireKind::Null)
    }

    pub fn from_bool(value: bool) -> Self {
        Self::new(WireKind::Boolean(value))
    }

    pub fn from_integer(value: i64) -> Self {
        Self::new(WireKind::Integer(value))
    }

    pub fn from_double(value: f64) -> Self {
        Self::new(WireKind::Double(value))
    }

    pub fn from_timestamp(value: Timestamp) -> Self {
        Self::new(WireKind::Timestamp(value))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self::new(WireKind::String(value.into()))
    }

    pub fn from_bytes(value: BytesValue) -> Self {
        Self::new(WireKind::Bytes(value))
    }

    pub fn from_reference(name: impl Into<String>) -> Self {
        Self::new(WireKind::Reference(name.into()))
    }

    pub fn from_geo_point(value: GeoPoint) -> Self {
        Self::new(WireKind::GeoPoint(value))
    }

    pub fn from_array(values: Vec<WireValue>) -> Self {
        Self::new(WireKind::Array(values))
    }

    pub fn from_map(fields: WireMap) -> Self {
        Self::new(WireKind::Map(fields))
    }

    pub fn from_operation(operation: FieldOperation) -> Self {
        Self::new(WireKind::Operation(operation))
    }

    pub fn kind(&self) -> &WireKind {
        &self.kind
    }

    pub fn into_kind(self) -> WireKind {
        self.kind
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, WireKind::Null)
    }

    pub fn as_operation(&self) -> Option<&FieldOperation> {
        match &self.kind {
            WireKind::Operation(operation) => Some(operation),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&WireMap> {
        match &self.kind {
            WireKind::Map(map) => Some(map),
            _ => None,
        }
    }

    /// REST-style typed JSON rendering, used for logging and request
    /// introspection.
    pub fn to_json(&self) -> JsonValue {
        match &self.kind {
            WireKind::Null => json!({ "nullValue": JsonValue::Null }),
            WireKind::Boolean(value) => json!({ "booleanValue": value }),
            WireKind::Integer(value) => json!({ "integerValue": value.to_string() }),
            WireKind::Double(value) => json!({ "doubleValue": value }),
            WireKind::Timestamp(value) => json!({ "timestampValue": value.to_rfc3339() }),
            WireKind::String(value) => json!({ "stringValue": value }),
            WireKind::Bytes(value) => json!({ "bytesValue": value.to_base64() }),
            WireKind::Reference(name) => json!({ "referenceValue": name }),
            WireKind::GeoPoint(point) => json!({
                "geoPointValue": {
                    "latitude": point.latitude(),
                    "longitude": point.longitude(),
                }
            }),
            WireKind::Array(values) => json!({
                "arrayValue": { "values": values.iter().map(WireValue::to_json).collect::<Vec<_>>() }
            }),
            WireKind::Map(fields) => json!({ "mapValue": { "fields": map_to_json(fields) } }),
            WireKind::Operation(operation) => operation.to_json(),
        }
    }
}

impl FieldOperation {
    pub fn to_json(&self) -> JsonValue {
        let encode_all =
            |values: &[WireValue]| values.iter().map(WireValue::to_json).collect::<Vec<_>>();
        match self {
            FieldOperation::Delete => json!({ "transform": "delete" }),
            FieldOperation::Increment(amount) => json!({ "increment": amount.to_json() }),
            FieldOperation::ArrayUnion(values) => {
                json!({ "appendMissingElements": { "values": encode_all(values) } })
            }
            FieldOperation::ArrayRemove(values) => {
                json!({ "removeAllFromArray": { "values": encode_all(values) } })
            }
            FieldOperation::ServerTimestamp => json!({ "setToServerValue": "REQUEST_TIME" }),
        }
    }
}

pub fn map_to_json(fields: &WireMap) -> JsonValue {
    JsonValue::Object(
        fields
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_typed_json() {
        let value = WireValue::from_map(BTreeMap::from([
            ("count".to_string(), WireValue::from_integer(3)),
            (
                "tags".to_string(),
                WireValue::from_array(vec![WireValue::from_string("a")]),
            ),
        ]));
        assert_eq!(
            value.to_json(),
            json!({
                "mapValue": { "fields": {
                    "count": { "integerValue": "3" },
                    "tags": { "arrayValue": { "values": [ { "stringValue": "a" } ] } }
                } }
            })
        );
    }

    #[test]
    fn renders_operations() {
        let increment = WireValue::from_operation(FieldOperation::Increment(Box::new(
            WireValue::from_integer(2),
        )));
        assert_eq!(
            increment.to_json(),
            json!({ "increment": { "integerValue": "2" } })
        );
        assert!(increment.as_operation().is_some());
    }
}
