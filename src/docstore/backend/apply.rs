use crate::docstore::error::{invalid_argument, DocstoreResult};
use crate::docstore::model::{FieldPath, Timestamp};
use crate::docstore::update::UpdateFields;
use crate::docstore::value::{FieldOperation, WireKind, WireMap, WireValue};

/// Full replace. Operations resolve against an empty document.
pub(crate) fn apply_set(data: &WireMap, commit_time: Timestamp) -> DocstoreResult<WireMap> {
    let mut fields = WireMap::new();
    for (key, value) in data {
        match value.as_operation() {
            Some(FieldOperation::Delete) => {
                return Err(invalid_argument(format!(
                    "delete() is not allowed in a full set (field '{key}')"
                )))
            }
            Some(operation) => {
                if let Some(resolved) = resolve_operation(operation, None, commit_time) {
                    fields.insert(key.clone(), resolved);
                }
            }
            None => {
                fields.insert(key.clone(), materialize(value, commit_time)?);
            }
        }
    }
    Ok(fields)
}

/// Deep merge of `data` into `existing`: nested maps merge key by key,
/// everything else replaces.
pub(crate) fn apply_merge(
    existing: Option<&WireMap>,
    data: &WireMap,
    commit_time: Timestamp,
) -> DocstoreResult<WireMap> {
    let mut fields = existing.cloned().unwrap_or_default();
    merge_into(&mut fields, data, commit_time)?;
    Ok(fields)
}

fn merge_into(target: &mut WireMap, data: &WireMap, commit_time: Timestamp) -> DocstoreResult<()> {
    for (key, value) in data {
        match value.kind() {
            WireKind::Operation(operation) => {
                match resolve_operation(operation, target.get(key), commit_time) {
                    Some(resolved) => {
                        target.insert(key.clone(), resolved);
                    }
                    None => {
                        target.remove(key);
                    }
                }
            }
            WireKind::Map(nested) if !nested.is_empty() => {
                let mut child = match target.get(key).map(WireValue::kind) {
                    Some(WireKind::Map(current)) => current.clone(),
                    _ => WireMap::new(),
                };
                merge_into(&mut child, nested, commit_time)?;
                target.insert(key.clone(), WireValue::from_map(child));
            }
            _ => {
                target.insert(key.clone(), materialize(value, commit_time)?);
            }
        }
    }
    Ok(())
}

/// Path-addressed partial write on an existing document.
pub(crate) fn apply_update(
    existing: &WireMap,
    fields: &UpdateFields,
    commit_time: Timestamp,
) -> DocstoreResult<WireMap> {
    let mut document = existing.clone();
    for (path, value) in fields.iter() {
        match value.as_operation() {
            Some(operation) => {
                let current = value_at(&document, path).cloned();
                match resolve_operation(operation, current.as_ref(), commit_time) {
                    Some(resolved) => set_at(&mut document, path, resolved),
                    None => remove_at(&mut document, path),
                }
            }
            None => set_at(&mut document, path, materialize(value, commit_time)?),
        }
    }
    Ok(document)
}

/// Computes the stored value for an operation. `None` removes the field.
fn resolve_operation(
    operation: &FieldOperation,
    current: Option<&WireValue>,
    commit_time: Timestamp,
) -> Option<WireValue> {
    match operation {
        FieldOperation::Delete => None,
        FieldOperation::ServerTimestamp => Some(WireValue::from_timestamp(commit_time)),
        FieldOperation::Increment(amount) => {
            let current = current.map(WireValue::kind);
            let sum = match (current, amount.kind()) {
                (Some(WireKind::Integer(base)), WireKind::Integer(delta)) => {
                    WireValue::from_integer(base.saturating_add(*delta))
                }
                (Some(WireKind::Integer(base)), WireKind::Double(delta)) => {
                    WireValue::from_double(*base as f64 + delta)
                }
                (Some(WireKind::Double(base)), WireKind::Integer(delta)) => {
                    WireValue::from_double(base + *delta as f64)
                }
                (Some(WireKind::Double(base)), WireKind::Double(delta)) => {
                    WireValue::from_double(base + delta)
                }
                _ => (**amount).clone(),
            };
            Some(sum)
        }
        FieldOperation::ArrayUnion(elements) => {
            let mut values = current_array(current);
            for element in elements {
                if !values.contains(element) {
                    values.push(element.clone());
                }
            }
            Some(WireValue::from_array(values))
        }
        FieldOperation::ArrayRemove(elements) => {
            let mut values = current_array(current);
            values.retain(|value| !elements.contains(value));
            Some(WireValue::from_array(values))
        }
    }
}

fn current_array(current: Option<&WireValue>) -> Vec<WireValue> {
    match current.map(WireValue::kind) {
        Some(WireKind::Array(values)) => values.clone(),
        _ => Vec::new(),
    }
}

/// Resolves operations nested inside map values of a literal write.
fn materialize(value: &WireValue, commit_time: Timestamp) -> DocstoreResult<WireValue> {
    match value.kind() {
        WireKind::Map(fields) => Ok(WireValue::from_map(apply_set(fields, commit_time)?)),
        WireKind::Operation(operation) => {
            resolve_operation(operation, None, commit_time).ok_or_else(|| {
                invalid_argument("delete() can only appear directly on an updated field")
            })
        }
        _ => Ok(value.clone()),
    }
}

pub(crate) fn value_at<'a>(fields: &'a WireMap, path: &FieldPath) -> Option<&'a WireValue> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = fields.get(first)?;
    for segment in rest {
        current = current.as_map()?.get(segment)?;
    }
    Some(current)
}

fn set_at(fields: &mut WireMap, path: &FieldPath, value: WireValue) {
    set_at_segments(fields, path.segments(), value);
}

fn set_at_segments(fields: &mut WireMap, segments: &[String], value: WireValue) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.insert(first.clone(), value);
        return;
    }
    let mut child = match fields.get(first).map(WireValue::kind) {
        Some(WireKind::Map(current)) => current.clone(),
        _ => WireMap::new(),
    };
    set_at_segments(&mut child, rest, value);
    fields.insert(first.clone(), WireValue::from_map(child));
}

fn remove_at(fields: &mut WireMap, path: &FieldPath) {
    remove_at_segments(fields, path.segments());
}

fn remove_at_segments(fields: &mut WireMap, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        fields.remove(first);
        return;
    }
    if let Some(WireKind::Map(current)) = fields.get(first).map(WireValue::kind) {
        let mut child = current.clone();
        remove_at_segments(&mut child, rest);
        fields.insert(first.clone(), WireValue::from_map(child));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::marshal::Marshaller;
    use crate::docstore::model::DatabaseId;
    use crate::docstore::update::UpdateBuilder;
    use crate::docstore::value::Value;
    use std::collections::BTreeMap;

    fn marshaller() -> Marshaller {
        Marshaller::new(DatabaseId::default("demo"))
    }

    fn wire(entries: &[(&str, Value)]) -> WireMap {
        let fields: BTreeMap<String, Value> = entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        marshaller().to_wire_map(&fields).unwrap()
    }

    fn now() -> Timestamp {
        Timestamp::new(1_700_000_000, 0)
    }

    #[test]
    fn set_resolves_operations_against_empty_document() {
        let data = wire(&[
            ("count", Value::increment(3)),
            ("tags", Value::array_union(["a", "a", "b"])),
            ("at", Value::server_timestamp()),
        ]);
        let stored = apply_set(&data, now()).unwrap();
        assert_eq!(stored["count"], WireValue::from_integer(3));
        assert_eq!(
            stored["tags"],
            WireValue::from_array(vec![WireValue::from_string("a"), WireValue::from_string("b")])
        );
        assert_eq!(stored["at"], WireValue::from_timestamp(now()));
    }

    #[test]
    fn set_rejects_delete() {
        let data = wire(&[("gone", Value::delete())]);
        assert!(apply_set(&data, now()).is_err());
    }

    #[test]
    fn merge_keeps_untouched_nested_fields() {
        let existing = wire(&[(
            "profile",
            Value::map([("city", Value::from("Paris")), ("zip", Value::from("75001"))]),
        )]);
        let data = wire(&[
            ("profile", Value::map([("city", Value::from("Lyon"))])),
            ("legacy", Value::delete()),
        ]);
        let merged = apply_merge(Some(&existing), &data, now()).unwrap();
        let profile = merged["profile"].as_map().unwrap();
        assert_eq!(profile["city"], WireValue::from_string("Lyon"));
        assert_eq!(profile["zip"], WireValue::from_string("75001"));
        assert!(!merged.contains_key("legacy"));
    }

    #[test]
    fn update_applies_operations_at_paths() {
        let existing = wire(&[
            ("stats", Value::map([("visits", Value::from(10))])),
            ("tags", Value::from(vec![Value::from("a"), Value::from("b")])),
            ("old", Value::from(true)),
        ]);
        let fields = UpdateBuilder::new()
            .set(["stats", "visits"], Value::increment(2))
            .set("tags", Value::array_remove(["a"]))
            .set("old", Value::delete())
            .set(["new", "nested"], 1)
            .compile()
            .unwrap()
            .to_wire(&marshaller())
            .unwrap();
        let updated = apply_update(&existing, &fields, now()).unwrap();
        let visits = FieldPath::new(["stats", "visits"]).unwrap();
        assert_eq!(value_at(&updated, &visits), Some(&WireValue::from_integer(12)));
        assert_eq!(
            updated["tags"],
            WireValue::from_array(vec![WireValue::from_string("b")])
        );
        assert!(!updated.contains_key("old"));
        let nested = FieldPath::new(["new", "nested"]).unwrap();
        assert_eq!(value_at(&updated, &nested), Some(&WireValue::from_integer(1)));
    }

    #[test]
    fn mixed_numeric_increment_promotes_to_double() {
        let existing = wire(&[("score", Value::from(1))]);
        let fields = UpdateBuilder::new()
            .set("score", Value::increment(0.5))
            .compile()
            .unwrap()
            .to_wire(&marshaller())
            .unwrap();
        let updated = apply_update(&existing, &fields, now()).unwrap();
        assert_eq!(updated["score"], WireValue::from_double(1.5));
    }
}
