use std::collections::BTreeMap;

use crate::docstore::error::DocstoreResult;
use crate::docstore::model::{FieldPath, IntoFieldPath};
use crate::docstore::value::Value;

use super::compiler::{compile_entries, compile_update, CompiledUpdate};

/// One `(path, value)` pair recorded by [`UpdateBuilder`].
///
/// Path validation is deferred to compilation so entries can be built inline
/// inside conditional expressions.
#[derive(Clone, Debug)]
pub struct FieldUpdate {
    path: DocstoreResult<FieldPath>,
    value: Value,
}

impl FieldUpdate {
    pub fn path(&self) -> DocstoreResult<&FieldPath> {
        self.path.as_ref().map_err(Clone::clone)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Pending field reference created by [`field`].
#[derive(Clone, Debug)]
pub struct FieldSetter {
    path: DocstoreResult<FieldPath>,
}

/// Starts a path-based update entry: `field(["stats", "visits"]).set(1)`.
pub fn field(path: impl IntoFieldPath) -> FieldSetter {
    FieldSetter {
        path: path.into_field_path(),
    }
}

impl FieldSetter {
    /// Always `Some`; the option lets conditional entries share one type.
    pub fn set(self, value: impl Into<Value>) -> Option<FieldUpdate> {
        Some(FieldUpdate {
            path: self.path,
            value: value.into(),
        })
    }

    /// Entry that is recorded only when `condition` holds.
    pub fn set_if(self, condition: bool, value: impl Into<Value>) -> Option<FieldUpdate> {
        if condition {
            self.set(value)
        } else {
            None
        }
    }
}

/// Path-based form of a partial update, entries kept in call order.
#[derive(Clone, Debug, Default)]
pub struct UpdateBuilder {
    entries: Vec<FieldUpdate>,
}

impl UpdateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = Option<FieldUpdate>>,
    {
        Self {
            entries: entries.into_iter().flatten().collect(),
        }
    }

    /// Records an entry; `None` placeholders are dropped.
    pub fn push(mut self, entry: Option<FieldUpdate>) -> Self {
        self.entries.extend(entry);
        self
    }

    pub fn set(self, path: impl IntoFieldPath, value: impl Into<Value>) -> Self {
        self.push(field(path).set(value))
    }

    pub fn entries(&self) -> &[FieldUpdate] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn compile(&self) -> DocstoreResult<CompiledUpdate> {
        compile_entries(&self.entries)
    }
}

/// Either shape accepted by `update`.
#[derive(Clone, Debug)]
pub enum UpdateData {
    Nested(BTreeMap<String, Value>),
    Paths(UpdateBuilder),
}

impl UpdateData {
    pub fn compile(&self) -> DocstoreResult<CompiledUpdate> {
        match self {
            UpdateData::Nested(fields) => compile_update(fields),
            UpdateData::Paths(builder) => builder.compile(),
        }
    }

    /// Every value carried by the update, for payload-wide checks.
    pub(crate) fn values(&self) -> Vec<&Value> {
        match self {
            UpdateData::Nested(fields) => fields.values().collect(),
            UpdateData::Paths(builder) => builder.entries.iter().map(FieldUpdate::value).collect(),
        }
    }
}

impl From<BTreeMap<String, Value>> for UpdateData {
    fn from(value: BTreeMap<String, Value>) -> Self {
        UpdateData::Nested(value)
    }
}

impl From<UpdateBuilder> for UpdateData {
    fn from(value: UpdateBuilder) -> Self {
        UpdateData::Paths(value)
    }
}

impl<const N: usize> From<[Option<FieldUpdate>; N]> for UpdateData {
    fn from(value: [Option<FieldUpdate>; N]) -> Self {
        UpdateData::Paths(UpdateBuilder::from_entries(value))
    }
}

impl From<Vec<Option<FieldUpdate>>> for UpdateData {
    fn from(value: Vec<Option<FieldUpdate>>) -> Self {
        UpdateData::Paths(UpdateBuilder::from_entries(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_placeholders_are_dropped() {
        let premium = false;
        let builder = UpdateBuilder::from_entries([
            field("name").set("Ada"),
            field("tier").set_if(premium, "gold"),
            None,
        ]);
        assert_eq!(builder.entries().len(), 1);
        assert_eq!(
            builder.entries()[0].path().unwrap().canonical_string(),
            "name"
        );
    }

    #[test]
    fn invalid_paths_surface_on_compile() {
        let builder = UpdateBuilder::new().set(["a", ""], 1);
        let err = builder.compile().unwrap_err();
        assert_eq!(err.code_str(), "docstore/invalid-argument");
    }
}
