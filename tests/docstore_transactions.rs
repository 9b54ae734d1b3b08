use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;

use docwire::docstore::{
    field, Doc, Docstore, DocstoreError, DocstoreOptions, ErrorKind, InMemoryBackend,
    InMemorySettings, Value,
};

fn counter_store(max_transaction_attempts: usize) -> (Docstore, InMemoryBackend) {
    let backend = InMemoryBackend::with_settings(InMemorySettings {
        max_transaction_attempts,
    });
    let store = Docstore::new(Arc::new(backend.clone()), DocstoreOptions::new("transactions"))
        .expect("valid options");
    (store, backend)
}

async fn seed_counter(store: &Docstore, value: i64) {
    store
        .set(
            ("counters", "main"),
            BTreeMap::from([("count".to_string(), Value::from(value))]),
        )
        .await
        .unwrap();
}

async fn read_counter(store: &Docstore) -> i64 {
    store
        .get(("counters", "main"))
        .await
        .unwrap()
        .and_then(|doc| doc.get("count").and_then(Value::as_i64))
        .unwrap()
}

async fn increment(store: Docstore) -> i64 {
    store
        .transaction(
            |reader| {
                async move {
                    let doc = reader.get(("counters", "main")).await?;
                    Ok::<_, DocstoreError>(
                        doc.and_then(|doc| doc.get("count").and_then(Value::as_i64))
                            .unwrap_or_default(),
                    )
                }
                .boxed()
            },
            |count: i64, writer| {
                writer.update(("counters", "main"), [field("count").set(count + 1)])?;
                Ok(count + 1)
            },
        )
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_increments_are_serialized() {
    const WORKERS: usize = 8;
    let (store, _backend) = counter_store(WORKERS + 1);
    seed_counter(&store, 10).await;

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| tokio::spawn(increment(store.clone())))
        .collect();
    let mut observed: Vec<i64> = join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();
    observed.sort_unstable();

    assert_eq!(read_counter(&store).await, 10 + WORKERS as i64);
    assert_eq!(observed, (11..=10 + WORKERS as i64).collect::<Vec<_>>());
}

#[tokio::test]
async fn conflicting_write_triggers_a_retry() {
    let (store, _backend) = counter_store(5);
    seed_counter(&store, 0).await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let read_attempts = Arc::clone(&attempts);
    let interfering = store.clone();

    let result = store
        .transaction(
            move |reader| {
                let attempt = read_attempts.fetch_add(1, Ordering::SeqCst);
                let interfering = interfering.clone();
                async move {
                    let count = reader
                        .get(("counters", "main"))
                        .await?
                        .and_then(|doc| doc.get("count").and_then(Value::as_i64))
                        .unwrap_or_default();
                    if attempt == 0 {
                        // a write between read and commit invalidates the read set
                        interfering
                            .update(("counters", "main"), [field("count").set(100)])
                            .await?;
                    }
                    Ok::<_, DocstoreError>(count)
                }
                .boxed()
            },
            |count: i64, writer| {
                writer.update(("counters", "main"), [field("count").set(count + 1)])?;
                Ok(count)
            },
        )
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(result, 100);
    assert_eq!(read_counter(&store).await, 101);
}

#[tokio::test]
async fn retry_exhaustion_is_reported() {
    let (store, _backend) = counter_store(3);
    seed_counter(&store, 0).await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let read_attempts = Arc::clone(&attempts);
    let interfering = store.clone();

    let err = store
        .transaction(
            move |reader| {
                read_attempts.fetch_add(1, Ordering::SeqCst);
                let interfering = interfering.clone();
                async move {
                    reader.get(("counters", "main")).await?;
                    interfering
                        .update(
                            ("counters", "main"),
                            [field("count").set(Value::increment(1))],
                        )
                        .await?;
                    Ok::<_, DocstoreError>(())
                }
                .boxed()
            },
            |_: (), writer| {
                writer.remove(("counters", "main"))?;
                Ok(())
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransactionRetryExhausted);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(read_counter(&store).await, 3);
}

#[tokio::test]
async fn write_phase_errors_are_not_retried() {
    let (store, _backend) = counter_store(5);
    seed_counter(&store, 0).await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let read_attempts = Arc::clone(&attempts);

    let err = store
        .transaction(
            move |reader| {
                read_attempts.fetch_add(1, Ordering::SeqCst);
                async move { reader.get_many([("counters", "main"), ("counters", "other")]).await }
                    .boxed()
            },
            |docs: Vec<Option<Doc>>, writer| {
                assert!(docs[1].is_none());
                writer.update(
                    ("counters", "main"),
                    [field("count").set(1), field(["count", "nested"]).set(2)],
                )?;
                Ok(())
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(read_counter(&store).await, 0);
}
