use std::collections::BTreeMap;

use crate::docstore::backend::Mutation;
use crate::docstore::environment::RuntimeEnvironment;
use crate::docstore::error::{capacity_exceeded, invalid_argument, DocstoreResult};
use crate::docstore::logger::LOGGER;
use crate::docstore::marshal::Marshaller;
use crate::docstore::model::DocumentKey;
use crate::docstore::update::UpdateData;
use crate::docstore::value::{FieldOperation, Value, WireKind, WireMap, WireValue};

use super::reference::DocTarget;

/// Everything needed to turn application writes into [`Mutation`]s.
#[derive(Clone, Debug)]
pub(crate) struct WriteContext {
    pub marshaller: Marshaller,
    pub environment: RuntimeEnvironment,
}

impl WriteContext {
    fn check_environment<'a>(&self, values: impl IntoIterator<Item = &'a Value>) -> DocstoreResult<()> {
        values
            .into_iter()
            .try_for_each(|value| self.environment.check_write(value))
    }

    pub fn encode_set(
        &self,
        key: DocumentKey,
        data: &BTreeMap<String, Value>,
    ) -> DocstoreResult<Mutation> {
        self.check_environment(data.values())?;
        let data = self.marshaller.to_wire_map(data)?;
        if map_contains_delete(&data) {
            return Err(invalid_argument(format!(
                "delete() cannot be used in a full set of '{key}'; use merge or update"
            )));
        }
        Ok(Mutation::Set { key, data })
    }

    pub fn encode_merge(
        &self,
        key: DocumentKey,
        data: &BTreeMap<String, Value>,
    ) -> DocstoreResult<Mutation> {
        self.check_environment(data.values())?;
        let data = self.marshaller.to_wire_map(data)?;
        Ok(Mutation::Merge { key, data })
    }

    /// `None` when the update compiles to no field paths.
    pub fn encode_update(
        &self,
        key: DocumentKey,
        data: &UpdateData,
    ) -> DocstoreResult<Option<Mutation>> {
        self.check_environment(data.values())?;
        let compiled = data.compile()?;
        if compiled.is_empty() {
            return Ok(None);
        }
        let fields = compiled.to_wire(&self.marshaller)?;
        Ok(Some(Mutation::Update { key, fields }))
    }
}

fn map_contains_delete(fields: &WireMap) -> bool {
    fields.values().any(value_contains_delete)
}

fn value_contains_delete(value: &WireValue) -> bool {
    match value.kind() {
        WireKind::Operation(FieldOperation::Delete) => true,
        WireKind::Map(fields) => map_contains_delete(fields),
        _ => false,
    }
}

/// Ordered mutation list keyed by document. Recording a second mutation for
/// the same document replaces the first one in place.
#[derive(Clone, Debug)]
pub(crate) struct MutationQueue {
    capacity: usize,
    mutations: Vec<Mutation>,
    positions: BTreeMap<DocumentKey, usize>,
}

impl MutationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            mutations: Vec::new(),
            positions: BTreeMap::new(),
        }
    }

    /// Records `mutation`, returning the earlier mutation it replaced.
    pub fn record(&mut self, mutation: Mutation) -> DocstoreResult<Option<Mutation>> {
        if let Some(&position) = self.positions.get(mutation.key()) {
            let replaced = std::mem::replace(&mut self.mutations[position], mutation);
            return Ok(Some(replaced));
        }
        if self.mutations.len() >= self.capacity {
            return Err(capacity_exceeded(format!(
                "A single commit cannot contain more than {} mutations",
                self.capacity
            )));
        }
        self.positions
            .insert(mutation.key().clone(), self.mutations.len());
        self.mutations.push(mutation);
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// Write primitives shared by [`Batch`](super::Batch) and
/// [`TransactionWriter`](super::TransactionWriter).
#[derive(Clone, Debug)]
pub(crate) struct WriteRecorder {
    context: WriteContext,
    queue: MutationQueue,
}

impl WriteRecorder {
    pub fn new(context: WriteContext, capacity: usize) -> Self {
        Self {
            context,
            queue: MutationQueue::new(capacity),
        }
    }

    pub fn set(&mut self, target: DocTarget, data: &BTreeMap<String, Value>) -> DocstoreResult<()> {
        let mutation = self.context.encode_set(target.into_key()?, data)?;
        self.record(mutation)
    }

    pub fn merge(&mut self, target: DocTarget, data: &BTreeMap<String, Value>) -> DocstoreResult<()> {
        let mutation = self.context.encode_merge(target.into_key()?, data)?;
        self.record(mutation)
    }

    pub fn update(&mut self, target: DocTarget, data: &UpdateData) -> DocstoreResult<()> {
        match self.context.encode_update(target.into_key()?, data)? {
            Some(mutation) => self.record(mutation),
            None => Ok(()),
        }
    }

    pub fn remove(&mut self, target: DocTarget) -> DocstoreResult<()> {
        self.record(Mutation::Delete {
            key: target.into_key()?,
        })
    }

    fn record(&mut self, mutation: Mutation) -> DocstoreResult<()> {
        let kind = mutation.kind();
        if let Some(replaced) = self.queue.record(mutation)? {
            LOGGER.debug(format!(
                "Replacing pending {} of '{}' with {kind}",
                replaced.kind(),
                replaced.key()
            ));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn mutations(&self) -> &[Mutation] {
        self.queue.mutations()
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.queue.into_mutations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::error::ErrorKind;
    use crate::docstore::model::DatabaseId;

    fn context(environment: RuntimeEnvironment) -> WriteContext {
        WriteContext {
            marshaller: Marshaller::new(DatabaseId::default("demo")),
            environment,
        }
    }

    fn key(id: &str) -> DocumentKey {
        DocumentKey::from_string(&format!("items/{id}")).unwrap()
    }

    #[test]
    fn same_target_replaces_in_place() {
        let mut queue = MutationQueue::new(10);
        queue.record(Mutation::Delete { key: key("a") }).unwrap();
        queue.record(Mutation::Delete { key: key("b") }).unwrap();
        let replaced = queue
            .record(Mutation::Set {
                key: key("a"),
                data: WireMap::new(),
            })
            .unwrap();
        assert_eq!(replaced, Some(Mutation::Delete { key: key("a") }));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.mutations()[0].kind(), "set");
        assert_eq!(queue.mutations()[1].key(), &key("b"));
    }

    #[test]
    fn capacity_is_checked_when_recording() {
        let mut queue = MutationQueue::new(2);
        queue.record(Mutation::Delete { key: key("a") }).unwrap();
        queue.record(Mutation::Delete { key: key("b") }).unwrap();
        let err = queue
            .record(Mutation::Delete { key: key("c") })
            .unwrap_err();
        assert_eq!(err.code_str(), "docstore/capacity-exceeded");
        assert_eq!(err.kind(), ErrorKind::Validation);
        // replacing an existing target never needs extra room
        assert!(queue.record(Mutation::Delete { key: key("a") }).is_ok());
    }

    #[test]
    fn later_write_to_the_same_document_wins() {
        let mut recorder = WriteRecorder::new(context(RuntimeEnvironment::Server), 10);
        let target = || DocTarget::from(("items", "a"));
        recorder
            .set(target(), &BTreeMap::from([("x".to_string(), Value::from(1))]))
            .unwrap();
        recorder
            .update(
                target(),
                &UpdateData::from(BTreeMap::from([("y".to_string(), Value::from(2))])),
            )
            .unwrap();
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.mutations()[0].kind(), "update");
    }

    #[test]
    fn set_rejects_nested_delete() {
        let data = BTreeMap::from([(
            "profile".to_string(),
            Value::map([("bio", Value::delete())]),
        )]);
        let err = context(RuntimeEnvironment::Server)
            .encode_set(key("a"), &data)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn empty_update_encodes_to_nothing() {
        let data = UpdateData::from(BTreeMap::new());
        let mutation = context(RuntimeEnvironment::Server)
            .encode_update(key("a"), &data)
            .unwrap();
        assert!(mutation.is_none());
    }

    #[test]
    fn client_environment_rejects_literal_dates() {
        let data = BTreeMap::from([("at".to_string(), Value::Date(chrono::Utc::now()))]);
        let err = context(RuntimeEnvironment::Client)
            .encode_merge(key("a"), &data)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EnvironmentMismatch);
    }
}
