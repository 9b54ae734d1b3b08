use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::docstore::backend::{Backend, CommitAck};
use crate::docstore::error::{usage_error, DocstoreResult};
use crate::docstore::logger::LOGGER;
use crate::docstore::update::UpdateData;
use crate::docstore::value::Value;

use super::mutations::{WriteContext, WriteRecorder};
use super::reference::DocTarget;

/// Aggregates writes against several documents and commits them atomically.
///
/// Recording a second write for a document replaces the first one at its
/// original position. Capacity is checked as writes are recorded, so a batch
/// that was built successfully always commits in one backend call.
pub struct Batch {
    backend: Arc<dyn Backend>,
    recorder: WriteRecorder,
    committed: AtomicBool,
}

impl Batch {
    pub(crate) fn new(backend: Arc<dyn Backend>, context: WriteContext, capacity: usize) -> Self {
        Self {
            backend,
            recorder: WriteRecorder::new(context, capacity),
            committed: AtomicBool::new(false),
        }
    }

    /// Replaces the whole document.
    ///
    /// Any write already recorded for the same document is discarded: a
    /// `set` followed by an `update` of one document commits only the
    /// `update`.
    pub fn set(
        &mut self,
        target: impl Into<DocTarget>,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<&mut Self> {
        self.ensure_open()?;
        self.recorder.set(target.into(), &data)?;
        Ok(self)
    }

    /// Creates the document or deep-merges into it.
    pub fn merge(
        &mut self,
        target: impl Into<DocTarget>,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<&mut Self> {
        self.ensure_open()?;
        self.recorder.merge(target.into(), &data)?;
        Ok(self)
    }

    /// Path-addressed partial write. Updates that compile to nothing are
    /// dropped. Like every write, it replaces an earlier write recorded for
    /// the same document instead of being applied on top of it.
    pub fn update(
        &mut self,
        target: impl Into<DocTarget>,
        data: impl Into<UpdateData>,
    ) -> DocstoreResult<&mut Self> {
        self.ensure_open()?;
        self.recorder.update(target.into(), &data.into())?;
        Ok(self)
    }

    pub fn remove(&mut self, target: impl Into<DocTarget>) -> DocstoreResult<&mut Self> {
        self.ensure_open()?;
        self.recorder.remove(target.into())?;
        Ok(self)
    }

    /// Number of distinct documents written by this batch.
    pub fn len(&self) -> usize {
        self.recorder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorder.len() == 0
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    /// Sends every recorded mutation in one atomic commit.
    ///
    /// A batch commits at most once. Later calls fail with a usage error
    /// whether or not the first commit succeeded.
    pub async fn commit(&self) -> DocstoreResult<CommitAck> {
        if self.committed.swap(true, Ordering::SeqCst) {
            return Err(usage_error("This batch has already been committed"));
        }
        let mutations = self.recorder.mutations().to_vec();
        LOGGER.debug(format!("Committing batch of {} mutation(s)", mutations.len()));
        self.backend.commit(mutations).await
    }

    fn ensure_open(&self) -> DocstoreResult<()> {
        if self.is_committed() {
            return Err(usage_error(
                "A batch cannot be modified after commit() has been called",
            ));
        }
        Ok(())
    }
}
