use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::json;

use crate::docstore::backend::{
    Backend, BackendTransaction, CommitAck, InMemoryBackend, ListenCallback, ListenErrorCallback,
    ListenTarget, Mutation, TransactionBody, WireDocument,
};
use crate::docstore::environment::RuntimeEnvironment;
use crate::docstore::error::{internal_error, not_found, DocstoreError, DocstoreResult};
use crate::docstore::logger::LOGGER;
use crate::docstore::marshal::{predict_set, Marshaller};
use crate::docstore::model::{DatabaseId, DocumentKey};
use crate::docstore::stream::{Emitter, FetchOnce, ResultStream, SubscribeFn, Unsubscribe};
use crate::docstore::update::UpdateData;
use crate::docstore::value::Value;

use super::mutations::WriteContext;
use super::options::DocstoreOptions;
use super::query::Query;
use super::reference::{Collection, DocRef, DocTarget};
use super::snapshot::{decode_document, decode_documents, Doc, SnapshotMetadata};
use super::transaction::{TransactionReader, TransactionWriter};
use super::write_batch::Batch;

/// Entry point of the data-access layer.
///
/// Cheap to clone; every clone shares the injected backend.
#[derive(Clone)]
pub struct Docstore {
    inner: Arc<DocstoreInner>,
}

struct DocstoreInner {
    backend: Arc<dyn Backend>,
    options: DocstoreOptions,
    marshaller: Marshaller,
}

impl Docstore {
    pub fn new(backend: Arc<dyn Backend>, options: DocstoreOptions) -> DocstoreResult<Self> {
        options.validate()?;
        let marshaller = Marshaller::new(options.database_id());
        Ok(Self {
            inner: Arc::new(DocstoreInner {
                backend,
                options,
                marshaller,
            }),
        })
    }

    /// Docstore over a fresh [`InMemoryBackend`] with default options.
    pub fn in_memory() -> Self {
        let options = DocstoreOptions::default();
        let marshaller = Marshaller::new(options.database_id());
        Self {
            inner: Arc::new(DocstoreInner {
                backend: Arc::new(InMemoryBackend::new()),
                options,
                marshaller,
            }),
        }
    }

    pub fn options(&self) -> &DocstoreOptions {
        &self.inner.options
    }

    pub fn environment(&self) -> RuntimeEnvironment {
        self.inner.options.environment
    }

    pub fn database_id(&self) -> &DatabaseId {
        self.inner.marshaller.database_id()
    }

    pub fn marshaller(&self) -> &Marshaller {
        &self.inner.marshaller
    }

    pub fn collection(&self, path: &str) -> DocstoreResult<Collection> {
        Collection::new(path)
    }

    /// Reference from a slash-separated document path such as `users/ada`.
    pub fn doc(&self, path: &str) -> DocstoreResult<DocRef> {
        DocRef::parse(path)
    }

    fn write_context(&self) -> WriteContext {
        WriteContext {
            marshaller: self.inner.marshaller.clone(),
            environment: self.inner.options.environment,
        }
    }

    /// Reads one document; resolves to `None` when it does not exist.
    pub fn get(&self, target: impl Into<DocTarget>) -> ResultStream<Option<Doc>> {
        match target.into().into_key() {
            Ok(key) => self.read_stream(ListenTarget::Document(key), decode_single),
            Err(err) => ResultStream::ready(Err(err)),
        }
    }

    /// Reads several documents of one collection in input order.
    ///
    /// Missing documents come back as `None`, or fail the whole read with a
    /// not-found error when `strict` is set.
    pub fn get_many<I, S>(
        &self,
        collection: &Collection,
        ids: I,
        strict: bool,
    ) -> ResultStream<Vec<Option<Doc>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = ids
            .into_iter()
            .map(|id| DocumentKey::from_parts(collection.path(), id.as_ref()))
            .collect::<DocstoreResult<Vec<_>>>();
        let keys = match keys {
            Ok(keys) => keys,
            Err(err) => return ResultStream::ready(Err(err)),
        };
        let request = json!({
            "documents": keys
                .iter()
                .map(|key| key.path().canonical_string())
                .collect::<Vec<_>>(),
            "strict": strict,
        });

        let fetch: FetchOnce<Vec<Option<Doc>>> = {
            let backend = Arc::clone(&self.inner.backend);
            let marshaller = self.inner.marshaller.clone();
            let keys = keys.clone();
            Box::new(move || -> BoxFuture<'static, DocstoreResult<Vec<Option<Doc>>>> {
                async move {
                    let documents = join_all(keys.iter().map(|key| backend.get(key)))
                        .await
                        .into_iter()
                        .collect::<DocstoreResult<Vec<_>>>()?;
                    decode_many(&marshaller, &documents, strict)
                }
                .boxed()
            })
        };

        let subscribe: SubscribeFn<Vec<Option<Doc>>> = {
            let backend = Arc::clone(&self.inner.backend);
            let marshaller = self.inner.marshaller.clone();
            Box::new(move |emit: Emitter<Vec<Option<Doc>>>| -> Unsubscribe {
                if keys.is_empty() {
                    emit(Ok(Vec::new()));
                    return Box::new(|| {});
                }
                // one slot per key, filled by its own document listener
                let slots: Arc<Mutex<Vec<Option<WireDocument>>>> =
                    Arc::new(Mutex::new(vec![None; keys.len()]));
                let mut unsubscribes: Vec<Unsubscribe> = Vec::with_capacity(keys.len());
                for (index, key) in keys.into_iter().enumerate() {
                    let slots = Arc::clone(&slots);
                    let marshaller = marshaller.clone();
                    let on_result_emit = Arc::clone(&emit);
                    let on_result: ListenCallback =
                        Arc::new(move |documents: Vec<WireDocument>| {
                            let complete = {
                                let mut slots =
                                    slots.lock().unwrap_or_else(PoisonError::into_inner);
                                slots[index] = documents.into_iter().next();
                                slots.iter().cloned().collect::<Option<Vec<_>>>()
                            };
                            if let Some(documents) = complete {
                                on_result_emit(decode_many(&marshaller, &documents, strict));
                            }
                        });
                    let on_error_emit = Arc::clone(&emit);
                    let on_error: ListenErrorCallback =
                        Arc::new(move |error: DocstoreError| on_error_emit(Err(error)));
                    unsubscribes.push(backend.subscribe(
                        ListenTarget::Document(key),
                        on_result,
                        on_error,
                    ));
                }
                Box::new(move || {
                    for unsubscribe in unsubscribes {
                        unsubscribe();
                    }
                })
            })
        };

        ResultStream::with_request(fetch, subscribe, request)
    }

    /// Every document of a collection.
    pub fn all(&self, collection: &Collection) -> ResultStream<Vec<Doc>> {
        self.query(&collection.query())
    }

    pub fn query(&self, query: &Query) -> ResultStream<Vec<Doc>> {
        match query.to_spec(&self.inner.marshaller) {
            Ok(spec) => self.read_stream(ListenTarget::Query(spec), decode_documents),
            Err(err) => ResultStream::ready(Err(err)),
        }
    }

    fn read_stream<T, D>(&self, target: ListenTarget, decode: D) -> ResultStream<T>
    where
        T: Clone + Send + Sync + 'static,
        D: Fn(&Marshaller, &[WireDocument]) -> DocstoreResult<T> + Send + Sync + 'static,
    {
        let decode = Arc::new(decode);
        let request = target.to_json();

        let fetch: FetchOnce<T> = {
            let backend = Arc::clone(&self.inner.backend);
            let marshaller = self.inner.marshaller.clone();
            let target = target.clone();
            let decode = Arc::clone(&decode);
            Box::new(move || -> BoxFuture<'static, DocstoreResult<T>> {
                async move {
                    let documents = match &target {
                        ListenTarget::Document(key) => vec![backend.get(key).await?],
                        ListenTarget::Query(spec) => backend.list(spec).await?,
                    };
                    decode(&marshaller, &documents)
                }
                .boxed()
            })
        };

        let subscribe: SubscribeFn<T> = {
            let backend = Arc::clone(&self.inner.backend);
            let marshaller = self.inner.marshaller.clone();
            Box::new(move |emit: Emitter<T>| -> Unsubscribe {
                let on_error_emit = Arc::clone(&emit);
                let on_result: ListenCallback = Arc::new(move |documents: Vec<WireDocument>| {
                    emit(decode(&marshaller, &documents))
                });
                let on_error: ListenErrorCallback =
                    Arc::new(move |error: DocstoreError| on_error_emit(Err(error)));
                backend.subscribe(target, on_result, on_error)
            })
        };

        ResultStream::with_request(fetch, subscribe, request)
    }

    /// Replaces the document and returns the locally predicted snapshot.
    ///
    /// The prediction omits sentinel fields and is flagged with pending
    /// writes; read the document again to observe server-computed values.
    pub async fn set(
        &self,
        target: impl Into<DocTarget>,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<Doc> {
        let key = target.into().into_key()?;
        let mutation = self.write_context().encode_set(key.clone(), &data)?;
        self.commit_one(mutation).await?;
        Ok(Doc::new(
            DocRef::from_key(key),
            predict_set(&data),
            SnapshotMetadata::new(false, true),
        ))
    }

    /// Creates the document or deep-merges `data` into it.
    pub async fn merge(
        &self,
        target: impl Into<DocTarget>,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<()> {
        let key = target.into().into_key()?;
        let mutation = self.write_context().encode_merge(key, &data)?;
        self.commit_one(mutation).await.map(|_| ())
    }

    /// Writes individual field paths of an existing document.
    ///
    /// An update that compiles to no paths never reaches the backend.
    pub async fn update(
        &self,
        target: impl Into<DocTarget>,
        data: impl Into<UpdateData>,
    ) -> DocstoreResult<()> {
        let key = target.into().into_key()?;
        match self.write_context().encode_update(key, &data.into())? {
            Some(mutation) => self.commit_one(mutation).await.map(|_| ()),
            None => {
                LOGGER.debug("Skipping empty update");
                Ok(())
            }
        }
    }

    pub async fn remove(&self, target: impl Into<DocTarget>) -> DocstoreResult<()> {
        let key = target.into().into_key()?;
        self.commit_one(Mutation::Delete { key }).await.map(|_| ())
    }

    /// Writes `data` to a new document with a generated id.
    pub async fn add(
        &self,
        collection: &Collection,
        data: BTreeMap<String, Value>,
    ) -> DocstoreResult<DocRef> {
        let reference = collection.auto_doc()?;
        self.set(&reference, data).await?;
        Ok(reference)
    }

    async fn commit_one(&self, mutation: Mutation) -> DocstoreResult<CommitAck> {
        LOGGER.debug(format!(
            "Committing {} of '{}'",
            mutation.kind(),
            mutation.key()
        ));
        self.inner.backend.commit(vec![mutation]).await
    }

    pub fn batch(&self) -> Batch {
        Batch::new(
            Arc::clone(&self.inner.backend),
            self.write_context(),
            self.inner.options.max_batch_writes,
        )
    }

    /// Runs a read-then-write cycle under the backend's optimistic
    /// concurrency control.
    ///
    /// `read` and `write` run again whenever the backend retries after a
    /// conflict, so neither should have side effects outside the provided
    /// handles. The value returned by the last successful `write` is
    /// returned.
    pub async fn transaction<R, W, ReadFn, WriteFn>(
        &self,
        read: ReadFn,
        write: WriteFn,
    ) -> DocstoreResult<W>
    where
        R: Send + 'static,
        W: Send + 'static,
        ReadFn: for<'a> Fn(&'a TransactionReader) -> BoxFuture<'a, DocstoreResult<R>>
            + Send
            + Sync
            + 'static,
        WriteFn: FnMut(R, &mut TransactionWriter) -> DocstoreResult<W> + Send + 'static,
    {
        let read = Arc::new(read);
        let write = Arc::new(Mutex::new(write));
        let outcome: Arc<Mutex<Option<W>>> = Arc::new(Mutex::new(None));
        let marshaller = self.inner.marshaller.clone();
        let context = self.write_context();
        let capacity = self.inner.options.max_batch_writes;

        let body: TransactionBody = {
            let outcome = Arc::clone(&outcome);
            let mut attempt = 0usize;
            Box::new(
                move |transaction: Arc<dyn BackendTransaction>| -> BoxFuture<'static, DocstoreResult<Vec<Mutation>>> {
                    attempt += 1;
                    LOGGER.debug(format!("Starting transaction attempt {attempt}"));
                    let read = Arc::clone(&read);
                    let write = Arc::clone(&write);
                    let outcome = Arc::clone(&outcome);
                    let reader = TransactionReader::new(transaction, marshaller.clone());
                    let mut writer = TransactionWriter::new(context.clone(), capacity);
                    async move {
                        let value = (*read)(&reader).await?;
                        let result = {
                            let mut guard = write.lock().unwrap_or_else(PoisonError::into_inner);
                            let write_phase = &mut *guard;
                            write_phase(value, &mut writer)?
                        };
                        *outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
                        Ok(writer.into_mutations())
                    }
                    .boxed()
                },
            )
        };

        self.inner.backend.run_transaction(body).await?;
        let result = outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        result.ok_or_else(|| internal_error("Transaction completed without running its write phase"))
    }
}

fn decode_single(marshaller: &Marshaller, documents: &[WireDocument]) -> DocstoreResult<Option<Doc>> {
    match documents.first() {
        Some(document) => decode_document(marshaller, document),
        None => Ok(None),
    }
}

fn decode_many(
    marshaller: &Marshaller,
    documents: &[WireDocument],
    strict: bool,
) -> DocstoreResult<Vec<Option<Doc>>> {
    documents
        .iter()
        .map(|document| {
            let doc = decode_document(marshaller, document)?;
            if strict && doc.is_none() {
                return Err(not_found(format!(
                    "Document '{}' does not exist",
                    document.key()
                )));
            }
            Ok(doc)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::error::ErrorKind;
    use crate::docstore::update::field;

    fn data(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn set_returns_predicted_document() {
        let store = Docstore::in_memory();
        let doc = store
            .set(
                ("users", "ada"),
                data(&[
                    ("name", Value::from("Ada")),
                    ("bio", Value::Undefined),
                    ("joined", Value::server_timestamp()),
                ]),
            )
            .await
            .unwrap();
        assert!(doc.has_pending_writes());
        assert_eq!(doc.get("bio"), Some(&Value::Null));
        assert_eq!(doc.get("joined"), None);

        let stored = store.get(("users", "ada")).await.unwrap().unwrap();
        assert!(!stored.has_pending_writes());
        assert!(matches!(stored.get("joined"), Some(Value::Date(_))));
    }

    #[tokio::test]
    async fn update_addresses_nested_paths() {
        let store = Docstore::in_memory();
        store
            .set(
                ("users", "ada"),
                data(&[("profile", Value::map([("city", "London"), ("zip", "N1")]))]),
            )
            .await
            .unwrap();
        store
            .update(
                ("users", "ada"),
                [field(["profile", "city"]).set("Paris"), field("visits").set_if(false, 1)],
            )
            .await
            .unwrap();
        let doc = store.get(("users", "ada")).await.unwrap().unwrap();
        assert_eq!(doc.get("profile.city"), Some(&Value::from("Paris")));
        assert_eq!(doc.get("profile.zip"), Some(&Value::from("N1")));
        assert_eq!(doc.get("visits"), None);
    }

    #[tokio::test]
    async fn update_of_missing_document_is_not_found() {
        let store = Docstore::in_memory();
        let err = store
            .update(("users", "ghost"), [field("name").set("x")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn strict_get_many_reports_missing_documents() {
        let store = Docstore::in_memory();
        let users = store.collection("users").unwrap();
        store
            .set((&users, "ada"), data(&[("n", Value::from(1))]))
            .await
            .unwrap();

        let lenient = store.get_many(&users, ["ada", "bob"], false).await.unwrap();
        assert!(lenient[0].is_some());
        assert!(lenient[1].is_none());

        let err = store
            .get_many(&users, ["ada", "bob"], true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn add_generates_ids() {
        let store = Docstore::in_memory();
        let users = store.collection("users").unwrap();
        let reference = store
            .add(&users, data(&[("n", Value::from(1))]))
            .await
            .unwrap();
        assert_eq!(reference.id().len(), 20);
        assert_eq!(store.all(&users).await.unwrap().len(), 1);
    }

    #[test]
    fn invalid_targets_fail_through_the_stream() {
        let store = Docstore::in_memory();
        let stream = store.get(("users/ada", "x"));
        let err = futures::executor::block_on(stream.get()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn rejects_invalid_options() {
        let options = DocstoreOptions::new("demo").with_max_batch_writes(0);
        let result = Docstore::new(Arc::new(InMemoryBackend::new()), options);
        assert!(result.is_err());
    }
}
