//! Recursive conversion between application [`Value`]s and backend
//! [`WireValue`]s.
//!
//! References become fully qualified document names of the marshaller's
//! database, dates become backend timestamps, `Undefined` becomes an explicit
//! null and every [`Sentinel`](crate::docstore::value::Sentinel) is translated
//! through the table in [`sentinel`]. None of the functions mutate their
//! input.

mod sentinel;

use std::collections::BTreeMap;

use crate::docstore::api::DocRef;
use crate::docstore::error::{internal_error, invalid_argument, DocstoreResult};
use crate::docstore::model::{DatabaseId, Timestamp};
use crate::docstore::value::{Sentinel, Value, WireKind, WireMap, WireValue};

/// Where a value sits relative to the field it is written to. Sentinels are
/// only legal directly on a field (possibly nested in maps).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    Field,
    ArrayElement,
    Operand,
}

#[derive(Clone, Debug)]
pub struct Marshaller {
    database_id: DatabaseId,
}

impl Marshaller {
    pub fn new(database_id: DatabaseId) -> Self {
        Self { database_id }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn to_wire(&self, value: &Value) -> DocstoreResult<WireValue> {
        self.encode(value, Position::Field)
    }

    pub fn to_wire_map(&self, fields: &BTreeMap<String, Value>) -> DocstoreResult<WireMap> {
        fields
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.encode(value, Position::Field)?)))
            .collect()
    }

    pub fn from_wire(&self, value: &WireValue) -> DocstoreResult<Value> {
        let decoded = match value.kind() {
            WireKind::Null => Value::Null,
            WireKind::Boolean(value) => Value::Boolean(*value),
            WireKind::Integer(value) => Value::Integer(*value),
            WireKind::Double(value) => Value::Double(*value),
            WireKind::Timestamp(timestamp) => Value::Date(timestamp.to_datetime()),
            WireKind::String(value) => Value::String(value.clone()),
            WireKind::Bytes(bytes) => Value::Bytes(bytes.clone()),
            WireKind::Reference(name) => {
                Value::Reference(DocRef::from_key(self.database_id.parse_document_name(name)?))
            }
            WireKind::GeoPoint(point) => Value::GeoPoint(*point),
            WireKind::Array(values) => Value::Array(
                values
                    .iter()
                    .map(|value| self.from_wire(value))
                    .collect::<DocstoreResult<_>>()?,
            ),
            WireKind::Map(fields) => Value::Map(self.from_wire_map(fields)?),
            WireKind::Operation(operation) => {
                return Err(internal_error(format!(
                    "Backend returned an unresolved field operation in read data: {}",
                    operation.to_json()
                )))
            }
        };
        Ok(decoded)
    }

    pub fn from_wire_map(&self, fields: &WireMap) -> DocstoreResult<BTreeMap<String, Value>> {
        fields
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.from_wire(value)?)))
            .collect()
    }

    pub(crate) fn encode_operand(
        &self,
        value: &Value,
        sentinel: &Sentinel,
    ) -> DocstoreResult<WireValue> {
        self.encode(value, Position::Operand).map_err(|err| {
            invalid_argument(format!("Invalid {}() operand: {}", sentinel.name(), err.message()))
        })
    }

    fn encode(&self, value: &Value, position: Position) -> DocstoreResult<WireValue> {
        let encoded = match value {
            Value::Undefined | Value::Null => WireValue::null(),
            Value::Boolean(value) => WireValue::from_bool(*value),
            Value::Integer(value) => WireValue::from_integer(*value),
            Value::Double(value) => WireValue::from_double(*value),
            Value::String(value) => WireValue::from_string(value.clone()),
            Value::Bytes(bytes) => WireValue::from_bytes(bytes.clone()),
            Value::Date(date) => WireValue::from_timestamp(Timestamp::from_datetime(date)),
            Value::GeoPoint(point) => WireValue::from_geo_point(*point),
            Value::Reference(reference) => {
                WireValue::from_reference(self.database_id.document_name(reference.key()))
            }
            Value::Array(values) => {
                let inner = match position {
                    Position::Field | Position::ArrayElement => Position::ArrayElement,
                    Position::Operand => Position::Operand,
                };
                WireValue::from_array(
                    values
                        .iter()
                        .map(|value| self.encode(value, inner))
                        .collect::<DocstoreResult<_>>()?,
                )
            }
            Value::Map(fields) => WireValue::from_map(
                fields
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.encode(value, position)?)))
                    .collect::<DocstoreResult<_>>()?,
            ),
            Value::Sentinel(sentinel) => {
                if position != Position::Field {
                    return Err(invalid_argument(format!(
                        "{}() cannot be used inside an array or another sentinel",
                        sentinel.name()
                    )));
                }
                WireValue::from_operation(sentinel::to_operation(self, sentinel)?)
            }
        };
        Ok(encoded)
    }
}

/// Replaces every `Undefined` with `Null`, predicting what a read would
/// return after a local write. Dates are atomic leaves.
pub fn nullify(value: &Value) -> Value {
    match value {
        Value::Undefined => Value::Null,
        Value::Array(values) => Value::Array(values.iter().map(nullify).collect()),
        Value::Map(fields) => Value::Map(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), nullify(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Local prediction of a full-replace write: nullified data with sentinel
/// fields left out, since their values are only known to the backend.
pub fn predict_set(fields: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    fields
        .iter()
        .filter(|(_, value)| !value.is_sentinel())
        .map(|(key, value)| {
            let predicted = match value {
                Value::Map(nested) => Value::Map(predict_set(nested)),
                other => nullify(other),
            };
            (key.clone(), predicted)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::model::GeoPoint;
    use crate::docstore::value::{BytesValue, FieldOperation};
    use chrono::{TimeZone, Utc};

    fn marshaller() -> Marshaller {
        Marshaller::new(DatabaseId::default("demo"))
    }

    fn contains_undefined(value: &Value) -> bool {
        match value {
            Value::Undefined => true,
            Value::Array(values) => values.iter().any(contains_undefined),
            Value::Map(map) => map.values().any(contains_undefined),
            _ => false,
        }
    }

    fn sample_document() -> Value {
        let date = Utc.timestamp_opt(1_650_000_000, 42_000).unwrap();
        Value::map([
            ("name", Value::from("Ada")),
            ("age", Value::from(36)),
            ("ratio", Value::from(0.5)),
            ("active", Value::from(true)),
            ("nothing", Value::Null),
            ("born", Value::Date(date)),
            ("avatar", Value::Bytes(BytesValue::new(vec![1, 2, 3]))),
            ("home", Value::GeoPoint(GeoPoint::new(51.5, -0.1).unwrap())),
            ("friend", Value::from(DocRef::new("users", "grace").unwrap())),
            (
                "history",
                Value::Array(vec![
                    Value::from(1),
                    Value::Array(vec![Value::Date(date)]),
                    Value::map([("nested", Value::from("x"))]),
                ]),
            ),
            ("empty", Value::Map(BTreeMap::new())),
        ])
    }

    #[test]
    fn sentinel_free_values_round_trip() {
        let m = marshaller();
        let original = sample_document();
        let wire = m.to_wire(&original).unwrap();
        assert_eq!(m.from_wire(&wire).unwrap(), original);
    }

    #[test]
    fn references_become_document_names() {
        let m = marshaller();
        let reference = DocRef::new("users", "grace").unwrap();
        let wire = m.to_wire(&Value::from(&reference)).unwrap();
        assert_eq!(
            wire.kind(),
            &WireKind::Reference("projects/demo/databases/(default)/documents/users/grace".into())
        );
        match m.from_wire(&wire).unwrap() {
            Value::Reference(decoded) => {
                assert_eq!(decoded.collection_path().canonical_string(), "users");
                assert_eq!(decoded.id(), "grace");
            }
            other => panic!("expected reference, found {other:?}"),
        }
    }

    #[test]
    fn undefined_is_nulled_at_every_depth() {
        let m = marshaller();
        let value = Value::map([
            ("a", Value::Undefined),
            (
                "b",
                Value::Array(vec![
                    Value::Undefined,
                    Value::map([("c", Value::Undefined)]),
                ]),
            ),
        ]);
        let decoded = m.from_wire(&m.to_wire(&value).unwrap()).unwrap();
        assert!(!contains_undefined(&decoded));
        assert_eq!(decoded.get_path(&["a"]), Some(&Value::Null));
        assert_eq!(
            decoded.as_map().unwrap()["b"],
            Value::Array(vec![Value::Null, Value::map([("c", Value::Null)])])
        );
    }

    #[test]
    fn does_not_mutate_input() {
        let m = marshaller();
        let value = Value::map([("a", Value::Undefined), ("b", Value::increment(1))]);
        let snapshot = value.clone();
        let _ = m.to_wire(&value).unwrap();
        assert_eq!(value, snapshot);
    }

    #[test]
    fn sentinels_become_operations_inside_maps() {
        let m = marshaller();
        let value = Value::map([("stats", Value::map([("visits", Value::increment(2))]))]);
        let wire = m.to_wire(&value).unwrap();
        let stats = wire.as_map().unwrap()["stats"].as_map().unwrap();
        assert_eq!(
            stats["visits"].as_operation(),
            Some(&FieldOperation::Increment(Box::new(WireValue::from_integer(2))))
        );
    }

    #[test]
    fn sentinels_inside_arrays_fail_fast() {
        let err = marshaller()
            .to_wire(&Value::Array(vec![Value::delete()]))
            .unwrap_err();
        assert_eq!(err.code_str(), "docstore/invalid-argument");
    }

    #[test]
    fn operations_never_reach_read_data() {
        let wire = WireValue::from_operation(FieldOperation::Delete);
        let err = marshaller().from_wire(&wire).unwrap_err();
        assert_eq!(err.code_str(), "docstore/internal");
    }

    #[test]
    fn nullify_keeps_dates_atomic() {
        let date = Utc.timestamp_opt(0, 0).unwrap();
        let value = Value::map([
            ("at", Value::Date(date)),
            ("missing", Value::Undefined),
            ("list", Value::Array(vec![Value::Undefined])),
        ]);
        assert_eq!(
            nullify(&value),
            Value::map([
                ("at", Value::Date(date)),
                ("missing", Value::Null),
                ("list", Value::Array(vec![Value::Null])),
            ])
        );
    }

    #[test]
    fn set_prediction_skips_sentinels() {
        let fields = BTreeMap::from([
            ("name".to_string(), Value::from("Ada")),
            ("updated".to_string(), Value::server_timestamp()),
            ("bio".to_string(), Value::Undefined),
        ]);
        let predicted = predict_set(&fields);
        assert_eq!(predicted.len(), 2);
        assert_eq!(predicted["bio"], Value::Null);
        assert!(!predicted.contains_key("updated"));
    }
}
