use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde::Deserialize;

use crate::docstore::constants::DEFAULT_MAX_TRANSACTION_ATTEMPTS;
use crate::docstore::error::{aborted, not_found, retry_exhausted, DocstoreError, DocstoreResult};
use crate::docstore::logger::LOGGER;
use crate::docstore::model::{DocumentKey, Timestamp};
use crate::docstore::stream::Unsubscribe;
use crate::docstore::value::WireMap;

use super::apply::{apply_merge, apply_set, apply_update};
use super::query_evaluator::evaluate;
use super::{
    Backend, BackendTransaction, CommitAck, ListenCallback, ListenErrorCallback, ListenTarget,
    Mutation, QuerySpec, TransactionBody, WireDocument,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InMemorySettings {
    /// Attempts a transaction gets before failing with a retry-exhausted
    /// error. Values below one behave as one.
    pub max_transaction_attempts: usize,
}

impl Default for InMemorySettings {
    fn default() -> Self {
        Self {
            max_transaction_attempts: DEFAULT_MAX_TRANSACTION_ATTEMPTS,
        }
    }
}

#[derive(Clone, Debug)]
struct StoredDocument {
    /// `None` is a tombstone left by a delete so version checks keep working.
    fields: Option<WireMap>,
    version: u64,
}

#[derive(Default)]
struct Store {
    documents: BTreeMap<DocumentKey, StoredDocument>,
    version: u64,
}

impl Store {
    fn version_of(&self, key: &DocumentKey) -> u64 {
        self.documents.get(key).map(|stored| stored.version).unwrap_or(0)
    }

    fn fields_of(&self, key: &DocumentKey) -> Option<&WireMap> {
        self.documents
            .get(key)
            .and_then(|stored| stored.fields.as_ref())
    }

    fn document(&self, key: &DocumentKey) -> WireDocument {
        match self.fields_of(key) {
            Some(fields) => WireDocument::found(key.clone(), fields.clone()),
            None => WireDocument::missing(key.clone()),
        }
    }

    fn result_for(&self, target: &ListenTarget) -> Vec<WireDocument> {
        match target {
            ListenTarget::Document(key) => vec![self.document(key)],
            ListenTarget::Query(query) => self.query(query),
        }
    }

    fn query(&self, query: &QuerySpec) -> Vec<WireDocument> {
        let candidates = self
            .documents
            .iter()
            .filter(|(key, _)| query.matches_collection(key))
            .filter_map(|(key, stored)| {
                stored
                    .fields
                    .as_ref()
                    .map(|fields| WireDocument::found(key.clone(), fields.clone()))
            })
            .collect();
        evaluate(query, candidates)
    }
}

struct ListenerEntry {
    id: u64,
    target: ListenTarget,
    on_result: ListenCallback,
    on_error: ListenErrorCallback,
    /// One past the newest store version delivered to this listener.
    delivered: Arc<AtomicU64>,
}

impl ListenerEntry {
    fn affected_by(&self, changed: &[DocumentKey]) -> bool {
        match &self.target {
            ListenTarget::Document(key) => changed.contains(key),
            ListenTarget::Query(query) => changed.iter().any(|key| query.matches_collection(key)),
        }
    }

    /// Captures the listener's result at the store's current version.
    fn snapshot(&self, store: &Store) -> Delivery {
        Delivery {
            on_result: Arc::clone(&self.on_result),
            delivered: Arc::clone(&self.delivered),
            version: store.version,
            documents: store.result_for(&self.target),
        }
    }
}

/// A listener result captured under the store lock and invoked after it is
/// released. Results older than one already delivered are dropped.
struct Delivery {
    on_result: ListenCallback,
    delivered: Arc<AtomicU64>,
    version: u64,
    documents: Vec<WireDocument>,
}

impl Delivery {
    fn run(self) {
        let previous = self.delivered.fetch_max(self.version + 1, Ordering::SeqCst);
        if previous > self.version {
            LOGGER.debug(format!(
                "Dropping listener result at version {} behind version {}",
                self.version,
                previous - 1
            ));
            return;
        }
        (self.on_result)(self.documents);
    }
}

struct Shared {
    settings: InMemorySettings,
    store: Mutex<Store>,
    listeners: Mutex<Vec<ListenerEntry>>,
    listener_counter: AtomicU64,
    injected_failure: Mutex<Option<DocstoreError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local backend with versioned documents and optimistic
/// transactions.
#[derive(Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_settings(InMemorySettings::default())
    }

    pub fn with_settings(settings: InMemorySettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                store: Mutex::new(Store::default()),
                listeners: Mutex::new(Vec::new()),
                listener_counter: AtomicU64::new(0),
                injected_failure: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> InMemorySettings {
        self.shared.settings
    }

    /// Makes the next commit fail with `error` before touching any document.
    pub fn fail_next_commit(&self, error: DocstoreError) {
        *lock(&self.shared.injected_failure) = Some(error);
    }

    /// Delivers `error` to every live subscription.
    pub fn broadcast_error(&self, error: DocstoreError) {
        let handlers: Vec<ListenErrorCallback> = lock(&self.shared.listeners)
            .iter()
            .map(|entry| entry.on_error.clone())
            .collect();
        for handler in handlers {
            handler(error.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).len()
    }

    fn read(&self, key: &DocumentKey) -> (WireDocument, u64) {
        let store = lock(&self.shared.store);
        (store.document(key), store.version_of(key))
    }

    fn commit_checked(
        &self,
        mutations: Vec<Mutation>,
        read_versions: Option<&BTreeMap<DocumentKey, u64>>,
    ) -> DocstoreResult<CommitAck> {
        if let Some(error) = lock(&self.shared.injected_failure).take() {
            return Err(error);
        }

        let write_count = mutations.len();
        let (commit_time, deliveries) = {
            let mut store = lock(&self.shared.store);
            if let Some(reads) = read_versions {
                for (key, version) in reads {
                    if store.version_of(key) != *version {
                        return Err(aborted(format!(
                            "Document '{key}' changed since it was read in this transaction"
                        )));
                    }
                }
            }

            let commit_time = Timestamp::now();
            let mut staged: BTreeMap<DocumentKey, Option<WireMap>> = BTreeMap::new();
            for mutation in &mutations {
                let key = mutation.key();
                let current = match staged.get(key) {
                    Some(pending) => pending.as_ref(),
                    None => store.fields_of(key),
                };
                let next = apply_mutation(current, mutation, commit_time)?;
                staged.insert(key.clone(), next);
            }

            let version = store.version + 1;
            store.version = version;
            let changed: Vec<DocumentKey> = staged.keys().cloned().collect();
            for (key, fields) in staged {
                store
                    .documents
                    .insert(key, StoredDocument { fields, version });
            }
            let deliveries: Vec<Delivery> = lock(&self.shared.listeners)
                .iter()
                .filter(|entry| entry.affected_by(&changed))
                .map(|entry| entry.snapshot(&store))
                .collect();
            (commit_time, deliveries)
        };

        for delivery in deliveries {
            delivery.run();
        }
        Ok(CommitAck {
            commit_time,
            write_count,
        })
    }

    fn remove_listener(shared: &Shared, listener_id: u64) {
        lock(&shared.listeners).retain(|entry| entry.id != listener_id);
    }
}

fn apply_mutation(
    current: Option<&WireMap>,
    mutation: &Mutation,
    commit_time: Timestamp,
) -> DocstoreResult<Option<WireMap>> {
    let next = match mutation {
        Mutation::Set { data, .. } => Some(apply_set(data, commit_time)?),
        Mutation::Merge { data, .. } => Some(apply_merge(current, data, commit_time)?),
        Mutation::Update { key, fields } => {
            let existing = current.ok_or_else(|| {
                not_found(format!("Cannot update '{key}': the document does not exist"))
            })?;
            Some(apply_update(existing, fields, commit_time)?)
        }
        Mutation::Delete { .. } => None,
    };
    Ok(next)
}

struct InMemoryTransaction {
    backend: InMemoryBackend,
    reads: Mutex<BTreeMap<DocumentKey, u64>>,
}

impl InMemoryTransaction {
    fn new(backend: InMemoryBackend) -> Self {
        Self {
            backend,
            reads: Mutex::new(BTreeMap::new()),
        }
    }

    fn read_versions(&self) -> BTreeMap<DocumentKey, u64> {
        lock(&self.reads).clone()
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl BackendTransaction for InMemoryTransaction {
    async fn get(&self, key: &DocumentKey) -> DocstoreResult<WireDocument> {
        let (document, version) = self.backend.read(key);
        // the first observed version is the one the commit is validated against
        lock(&self.reads).entry(key.clone()).or_insert(version);
        Ok(document)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Backend for InMemoryBackend {
    async fn get(&self, key: &DocumentKey) -> DocstoreResult<WireDocument> {
        Ok(self.read(key).0)
    }

    async fn list(&self, query: &QuerySpec) -> DocstoreResult<Vec<WireDocument>> {
        Ok(lock(&self.shared.store).query(query))
    }

    fn subscribe(
        &self,
        target: ListenTarget,
        on_result: ListenCallback,
        on_error: ListenErrorCallback,
    ) -> Unsubscribe {
        let id = self.shared.listener_counter.fetch_add(1, Ordering::SeqCst);
        let initial = {
            let store = lock(&self.shared.store);
            let entry = ListenerEntry {
                id,
                target,
                on_result,
                on_error,
                delivered: Arc::new(AtomicU64::new(0)),
            };
            let initial = entry.snapshot(&store);
            lock(&self.shared.listeners).push(entry);
            initial
        };
        initial.run();

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                InMemoryBackend::remove_listener(&shared, id);
            }
        })
    }

    async fn commit(&self, mutations: Vec<Mutation>) -> DocstoreResult<CommitAck> {
        self.commit_checked(mutations, None)
    }

    async fn run_transaction(&self, mut body: TransactionBody) -> DocstoreResult<()> {
        let attempts = self.shared.settings.max_transaction_attempts.max(1);
        let mut last_conflict = None;
        for attempt in 1..=attempts {
            let transaction = Arc::new(InMemoryTransaction::new(self.clone()));
            let handle: Arc<dyn BackendTransaction> = transaction.clone();
            let outcome = match body(handle).await {
                Ok(mutations) => self
                    .commit_checked(mutations, Some(&transaction.read_versions()))
                    .map(|_| ()),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable_conflict() => {
                    LOGGER.debug(format!(
                        "Transaction attempt {attempt}/{attempts} conflicted, retrying: {err}"
                    ));
                    last_conflict = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        LOGGER.warn(format!(
            "Transaction gave up after {attempts} conflicting attempts"
        ));
        Err(retry_exhausted(format!(
            "Transaction failed after {attempts} attempts: {}",
            last_conflict
                .map(|err| err.message().to_string())
                .unwrap_or_default()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::error::{unavailable, ErrorKind};
    use crate::docstore::value::WireValue;
    use std::sync::atomic::AtomicUsize;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn fields(value: i64) -> WireMap {
        WireMap::from([("value".to_string(), WireValue::from_integer(value))])
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing() {
        let backend = InMemoryBackend::new();
        let err = backend
            .commit(vec![
                Mutation::Set {
                    key: key("items/a"),
                    data: fields(1),
                },
                Mutation::Update {
                    key: key("items/missing"),
                    fields: Default::default(),
                },
            ])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!backend.get(&key("items/a")).await.unwrap().exists());
    }

    #[tokio::test]
    async fn later_mutations_see_earlier_ones_in_the_same_commit() {
        let backend = InMemoryBackend::new();
        let ack = backend
            .commit(vec![
                Mutation::Set {
                    key: key("items/a"),
                    data: fields(1),
                },
                Mutation::Merge {
                    key: key("items/a"),
                    data: WireMap::from([("extra".to_string(), WireValue::from_bool(true))]),
                },
            ])
            .await
            .unwrap();
        assert_eq!(ack.write_count, 2);
        let stored = backend.get(&key("items/a")).await.unwrap();
        assert_eq!(stored.fields().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn injected_failures_surface_once() {
        let backend = InMemoryBackend::new();
        backend.fail_next_commit(unavailable("offline"));
        let mutation = Mutation::Delete { key: key("items/a") };
        let err = backend.commit(vec![mutation.clone()]).await.unwrap_err();
        assert_eq!(err.code_str(), "docstore/unavailable");
        assert!(backend.commit(vec![mutation]).await.is_ok());
    }

    #[test]
    fn listeners_receive_initial_and_change_events() {
        let backend = InMemoryBackend::new();
        let events = Arc::new(AtomicUsize::new(0));
        let seen = events.clone();
        let unsubscribe = backend.subscribe(
            ListenTarget::Document(key("items/a")),
            Arc::new(move |_: Vec<WireDocument>| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(|_: DocstoreError| {}),
        );
        assert_eq!(events.load(Ordering::SeqCst), 1);

        backend
            .commit_checked(
                vec![Mutation::Set {
                    key: key("items/a"),
                    data: fields(1),
                }],
                None,
            )
            .unwrap();
        backend
            .commit_checked(
                vec![Mutation::Set {
                    key: key("items/b"),
                    data: fields(1),
                }],
                None,
            )
            .unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 2);

        unsubscribe();
        assert_eq!(backend.listener_count(), 0);
    }

    #[test]
    fn out_of_order_results_never_overwrite_newer_ones() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_result: ListenCallback = Arc::new(move |documents: Vec<WireDocument>| {
            sink.lock().unwrap().push(documents.len());
        });
        let delivered = Arc::new(AtomicU64::new(0));
        let delivery = |version: u64, count: usize| Delivery {
            on_result: Arc::clone(&on_result),
            delivered: Arc::clone(&delivered),
            version,
            documents: vec![WireDocument::missing(key("items/a")); count],
        };

        delivery(0, 1).run();
        delivery(2, 3).run();
        // captured before version 2 but invoked after it
        delivery(1, 2).run();
        delivery(3, 4).run();
        assert_eq!(*seen.lock().unwrap(), vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn query_listener_sees_each_commit_in_order() {
        let backend = InMemoryBackend::new();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sizes);
        let query = QuerySpec::collection(crate::docstore::model::ResourcePath::parse("items").unwrap());
        let _unsubscribe = backend.subscribe(
            ListenTarget::Query(query),
            Arc::new(move |documents: Vec<WireDocument>| {
                sink.lock().unwrap().push(documents.len());
            }),
            Arc::new(|_: DocstoreError| {}),
        );
        for id in ["a", "b", "c"] {
            backend
                .commit(vec![Mutation::Set {
                    key: key(&format!("items/{id}")),
                    data: fields(1),
                }])
                .await
                .unwrap();
        }
        assert_eq!(*sizes.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn stale_reads_abort_the_commit() {
        let backend = InMemoryBackend::new();
        let transaction = InMemoryTransaction::new(backend.clone());
        transaction.get(&key("items/a")).await.unwrap();
        backend
            .commit(vec![Mutation::Set {
                key: key("items/a"),
                data: fields(1),
            }])
            .await
            .unwrap();
        let err = backend
            .commit_checked(
                vec![Mutation::Set {
                    key: key("items/a"),
                    data: fields(2),
                }],
                Some(&transaction.read_versions()),
            )
            .unwrap_err();
        assert!(err.is_retryable_conflict());
    }
}
