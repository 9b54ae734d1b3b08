use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::docstore::backend::{BackendTransaction, Mutation};
use crate::docstore::error::DocstoreResult;
use crate::docstore::marshal::Marshaller;
use crate::docstore::update::UpdateData;
use crate::docstore::value::Value;

use super::mutations::{WriteContext, WriteRecorder};
use super::reference::DocTarget;
use super::snapshot::{decode_document, Doc};

/// Read phase handle of [`Docstore::transaction`](super::Docstore::transaction).
///
/// Every document read through it is validated again when the transaction
/// commits; a concurrent change makes the backend retry the whole cycle.
pub struct TransactionReader {
    transaction: Arc<dyn BackendTransaction>,
    marshaller: Marshaller,
}

impl TransactionReader {
    pub(crate) fn new(transaction: Arc<dyn BackendTransaction>, marshaller: Marshaller) -> Self {
        Self {
            transaction,
            marshaller,
        }
    }

    /// Reads one document; `None` when it does not exist.
    pub async fn get(&self, target: impl Into<DocTarget>) -> DocstoreResult<Option<Doc>> {
        let key = target.into().into_key()?;
        let document = self.transaction.get(&key).await?;
        decode_document(&self.marshaller, &document)
    }

    /// Reads several documents concurrently, preserving the input order.
    pub async fn get_many<I, T>(&self, targets: I) -> DocstoreResult<Vec<Option<Doc>>>
    where
        I: IntoIterator<Item = T>,
        T: Into<DocTarget>,
    {
        let keys = targets
            .into_iter()
            .map(|target| target.into().into_key())
            .collect::<DocstoreResult<Vec<_>>>()?;
        let documents = join_all(keys.iter().map(|key| self.transaction.get(key))).await;
        documents
            .into_iter()
            .map(|document| decode_document(&self.marshaller, &document?))
            .collect()
    }
}

/// Write phase handle of [`Docstore::transaction`](super::Docstore::transaction).
///
/// Offers the same primitives as [`Batch`](super::Batch), including its
/// rule that a later write to a document replaces the earlier one. The
/// recorded mutations are committed together with the read-set validation.
pub struct TransactionWriter {
    recorder: WriteRecorder,
}

impl TransactionWriter {
    pub(crate) fn new(context: WriteContext, capacity: usize) -> Self {
        Self {
            recorder: WriteRecorder::new(context, capacity),
        }
    }

    pub fn set(
        &mut self,
        target: impl Into<DocTarget>,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<&mut Self> {
        self.recorder.set(target.into(), &data)?;
        Ok(self)
    }

    pub fn merge(
        &mut self,
        target: impl Into<DocTarget>,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<&mut Self> {
        self.recorder.merge(target.into(), &data)?;
        Ok(self)
    }

    pub fn update(
        &mut self,
        target: impl Into<DocTarget>,
        data: impl Into<UpdateData>,
    ) -> DocstoreResult<&mut Self> {
        self.recorder.update(target.into(), &data.into())?;
        Ok(self)
    }

    pub fn remove(&mut self, target: impl Into<DocTarget>) -> DocstoreResult<&mut Self> {
        self.recorder.remove(target.into())?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.recorder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorder.len() == 0
    }

    pub(crate) fn into_mutations(self) -> Vec<Mutation> {
        self.recorder.into_mutations()
    }
}
