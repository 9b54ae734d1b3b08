use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::docstore::error::{invalid_argument, DocstoreResult};
use crate::docstore::marshal::Marshaller;
use crate::docstore::model::FieldPath;
use crate::docstore::value::{Value, WireValue};

use super::builder::FieldUpdate;

/// Flattened partial update: non-overlapping field paths in call order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledUpdate {
    entries: Vec<(FieldPath, Value)>,
}

impl CompiledUpdate {
    pub fn entries(&self) -> &[(FieldPath, Value)] {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.entries.iter().map(|(path, _)| path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes every leaf through the marshaller.
    pub fn to_wire(&self, marshaller: &Marshaller) -> DocstoreResult<UpdateFields> {
        let entries = self
            .entries
            .iter()
            .map(|(path, value)| Ok((path.clone(), marshaller.to_wire(value)?)))
            .collect::<DocstoreResult<_>>()?;
        Ok(UpdateFields { entries })
    }
}

/// Wire form of a compiled update as handed to the backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateFields {
    entries: Vec<(FieldPath, WireValue)>,
}

impl UpdateFields {
    pub fn iter(&self) -> impl Iterator<Item = &(FieldPath, WireValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dotted path → wire value, the shape backends receive.
    pub fn canonical_map(&self) -> BTreeMap<String, WireValue> {
        self.entries
            .iter()
            .map(|(path, value)| (path.canonical_string(), value.clone()))
            .collect()
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.entries
                .iter()
                .map(|(path, value)| (path.canonical_string(), value.to_json()))
                .collect(),
        )
    }
}

/// Flattens a nested partial update into dotted field paths.
///
/// Non-empty maps expand into their children, empty maps contribute nothing
/// and sentinels are leaves.
pub fn compile_update(data: &BTreeMap<String, Value>) -> DocstoreResult<CompiledUpdate> {
    let mut entries = Vec::new();
    for (key, value) in data {
        flatten_into(&mut entries, FieldPath::new([key])?, value)?;
    }
    finish(entries)
}

pub(crate) fn compile_entries(updates: &[FieldUpdate]) -> DocstoreResult<CompiledUpdate> {
    let mut entries = Vec::new();
    for update in updates {
        flatten_into(&mut entries, update.path()?.clone(), update.value())?;
    }
    finish(entries)
}

fn flatten_into(
    acc: &mut Vec<(FieldPath, Value)>,
    path: FieldPath,
    value: &Value,
) -> DocstoreResult<()> {
    match value {
        Value::Map(fields) => {
            for (key, child) in fields {
                flatten_into(acc, path.child(key)?, child)?;
            }
            Ok(())
        }
        _ => {
            acc.push((path, value.clone()));
            Ok(())
        }
    }
}

fn finish(entries: Vec<(FieldPath, Value)>) -> DocstoreResult<CompiledUpdate> {
    ensure_disjoint(entries.iter().map(|(path, _)| path))?;
    Ok(CompiledUpdate { entries })
}

/// Rejects duplicated paths and paths nested under another path of the same
/// update.
fn ensure_disjoint<'a>(paths: impl Iterator<Item = &'a FieldPath>) -> DocstoreResult<()> {
    let mut sorted: Vec<&FieldPath> = paths.collect();
    sorted.sort();
    for pair in sorted.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        if previous == next {
            return Err(invalid_argument(format!(
                "Field path '{previous}' is specified more than once in the update"
            )));
        }
        if previous.is_strict_prefix_of(next) {
            return Err(invalid_argument(format!(
                "Field path '{previous}' overlaps with '{next}' in the same update"
            )));
        }
    }
    Ok(())
}
