//! Capability boundary between the data-access layer and a document database.
//!
//! The layer only ever talks to a backend through [`Backend`]; everything
//! crossing it is already in wire form (keys, [`WireMap`]s and
//! [`Mutation`]s). [`InMemoryBackend`] is the bundled implementation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value as JsonValue};

use crate::docstore::api::query::{FilterOperator, OrderDirection};
use crate::docstore::error::{DocstoreError, DocstoreResult};
use crate::docstore::model::{DocumentKey, FieldPath, ResourcePath, Timestamp};
use crate::docstore::stream::Unsubscribe;
use crate::docstore::update::UpdateFields;
use crate::docstore::value::{map_to_json, WireMap, WireValue};

mod apply;
pub mod in_memory;
mod query_evaluator;

pub use in_memory::{InMemoryBackend, InMemorySettings};

/// Stored state of one document as returned by a backend read.
#[derive(Clone, Debug, PartialEq)]
pub struct WireDocument {
    key: DocumentKey,
    fields: Option<WireMap>,
    from_cache: bool,
}

impl WireDocument {
    pub fn found(key: DocumentKey, fields: WireMap) -> Self {
        Self {
            key,
            fields: Some(fields),
            from_cache: false,
        }
    }

    pub fn missing(key: DocumentKey) -> Self {
        Self {
            key,
            fields: None,
            from_cache: false,
        }
    }

    pub fn with_from_cache(mut self, from_cache: bool) -> Self {
        self.from_cache = from_cache;
        self
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn exists(&self) -> bool {
        self.fields.is_some()
    }

    pub fn fields(&self) -> Option<&WireMap> {
        self.fields.as_ref()
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }
}

/// One write against one document, already marshalled.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    /// Full replace; creates the document when missing.
    Set { key: DocumentKey, data: WireMap },
    /// Create-or-merge into the existing document.
    Merge { key: DocumentKey, data: WireMap },
    /// Path-addressed partial write; the document must exist.
    Update {
        key: DocumentKey,
        fields: UpdateFields,
    },
    Delete { key: DocumentKey },
}

impl Mutation {
    pub fn key(&self) -> &DocumentKey {
        match self {
            Mutation::Set { key, .. }
            | Mutation::Merge { key, .. }
            | Mutation::Update { key, .. }
            | Mutation::Delete { key } => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Set { .. } => "set",
            Mutation::Merge { .. } => "merge",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let path = self.key().path().canonical_string();
        match self {
            Mutation::Set { data, .. } => json!({ "set": path, "fields": map_to_json(data) }),
            Mutation::Merge { data, .. } => json!({ "merge": path, "fields": map_to_json(data) }),
            Mutation::Update { fields, .. } => json!({ "update": path, "fields": fields.to_json() }),
            Mutation::Delete { .. } => json!({ "delete": path }),
        }
    }
}

/// Result of a successful commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitAck {
    pub commit_time: Timestamp,
    pub write_count: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    pub field: FieldPath,
    pub operator: FilterOperator,
    pub value: WireValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: FieldPath,
    pub direction: OrderDirection,
}

/// Wire form of a collection query.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySpec {
    pub collection: ResourcePath,
    pub filters: Vec<FieldFilter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn collection(collection: ResourcePath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn matches_collection(&self, key: &DocumentKey) -> bool {
        key.collection_path() == self.collection
    }

    pub fn to_json(&self) -> JsonValue {
        json!({
            "from": self.collection.canonical_string(),
            "where": self.filters.iter().map(|filter| json!({
                "field": filter.field.canonical_string(),
                "op": filter.operator.as_str(),
                "value": filter.value.to_json(),
            })).collect::<Vec<_>>(),
            "orderBy": self.order_by.iter().map(|order| json!({
                "field": order.field.canonical_string(),
                "direction": order.direction.as_str(),
            })).collect::<Vec<_>>(),
            "limit": self.limit,
        })
    }
}

/// What a live subscription observes.
#[derive(Clone, Debug, PartialEq)]
pub enum ListenTarget {
    Document(DocumentKey),
    Query(QuerySpec),
}

impl ListenTarget {
    pub fn to_json(&self) -> JsonValue {
        match self {
            ListenTarget::Document(key) => json!({ "document": key.path().canonical_string() }),
            ListenTarget::Query(query) => json!({ "query": query.to_json() }),
        }
    }
}

/// Receives the full current result for a target: one element for a
/// document target (possibly missing), every match for a query.
pub type ListenCallback = Arc<dyn Fn(Vec<WireDocument>) + Send + Sync + 'static>;
pub type ListenErrorCallback = Arc<dyn Fn(DocstoreError) + Send + Sync + 'static>;

/// Read handle scoped to one transaction attempt.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait BackendTransaction: Send + Sync + 'static {
    async fn get(&self, key: &DocumentKey) -> DocstoreResult<WireDocument>;
}

/// Retryable transaction body: reads through the handle and returns the
/// mutations to commit. May be invoked once per attempt.
pub type TransactionBody = Box<
    dyn FnMut(Arc<dyn BackendTransaction>) -> BoxFuture<'static, DocstoreResult<Vec<Mutation>>>
        + Send,
>;

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Backend: Send + Sync + 'static {
    async fn get(&self, key: &DocumentKey) -> DocstoreResult<WireDocument>;

    async fn list(&self, query: &QuerySpec) -> DocstoreResult<Vec<WireDocument>>;

    /// Starts a live subscription. The returned action stops it.
    fn subscribe(
        &self,
        target: ListenTarget,
        on_result: ListenCallback,
        on_error: ListenErrorCallback,
    ) -> Unsubscribe;

    /// Applies every mutation atomically or none of them.
    async fn commit(&self, mutations: Vec<Mutation>) -> DocstoreResult<CommitAck>;

    /// Runs `body` under the backend's optimistic concurrency control,
    /// retrying on read-set conflicts until its own retry budget is spent.
    async fn run_transaction(&self, body: TransactionBody) -> DocstoreResult<()>;
}
