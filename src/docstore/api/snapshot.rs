use std::collections::BTreeMap;

use crate::docstore::backend::WireDocument;
use crate::docstore::error::DocstoreResult;
use crate::docstore::marshal::Marshaller;
use crate::docstore::model::IntoFieldPath;
use crate::docstore::value::Value;

use super::reference::DocRef;

/// Metadata about the state of a document snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotMetadata {
    from_cache: bool,
    has_pending_writes: bool,
}

impl SnapshotMetadata {
    pub fn new(from_cache: bool, has_pending_writes: bool) -> Self {
        Self {
            from_cache,
            has_pending_writes,
        }
    }

    /// Indicates whether the snapshot was served from a local cache.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Indicates whether the snapshot reflects writes not yet acknowledged by
    /// the backend.
    pub fn has_pending_writes(&self) -> bool {
        self.has_pending_writes
    }
}

/// Immutable result of reading one existing document.
#[derive(Clone, Debug, PartialEq)]
pub struct Doc {
    reference: DocRef,
    data: BTreeMap<String, Value>,
    metadata: SnapshotMetadata,
}

impl Doc {
    pub fn new(reference: DocRef, data: BTreeMap<String, Value>, metadata: SnapshotMetadata) -> Self {
        Self {
            reference,
            data,
            metadata,
        }
    }

    pub fn reference(&self) -> &DocRef {
        &self.reference
    }

    pub fn id(&self) -> &str {
        self.reference.id()
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn into_data(self) -> BTreeMap<String, Value> {
        self.data
    }

    /// Looks up a possibly nested field. Invalid paths read as absent.
    pub fn get(&self, path: impl IntoFieldPath) -> Option<&Value> {
        let path = path.into_field_path().ok()?;
        let (first, rest) = path.segments().split_first()?;
        self.data.get(first)?.get_path(rest)
    }

    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn from_cache(&self) -> bool {
        self.metadata.from_cache()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.metadata.has_pending_writes()
    }
}

/// Converts a backend read into a snapshot; `None` when the document is
/// missing.
pub(crate) fn decode_document(
    marshaller: &Marshaller,
    document: &WireDocument,
) -> DocstoreResult<Option<Doc>> {
    let Some(fields) = document.fields() else {
        return Ok(None);
    };
    Ok(Some(Doc::new(
        DocRef::from_key(document.key().clone()),
        marshaller.from_wire_map(fields)?,
        SnapshotMetadata::new(document.from_cache(), false),
    )))
}

/// Decodes every existing document of a query result.
pub(crate) fn decode_documents(
    marshaller: &Marshaller,
    documents: &[WireDocument],
) -> DocstoreResult<Vec<Doc>> {
    let mut decoded = Vec::with_capacity(documents.len());
    for document in documents {
        if let Some(doc) = decode_document(marshaller, document)? {
            decoded.push(doc);
        }
    }
    Ok(decoded)
}
