use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use docwire::docstore::error::unavailable;
use docwire::docstore::{
    Docstore, DocstoreOptions, ErrorKind, FilterOperator, InMemoryBackend, Observer,
    OrderDirection, Value,
};

fn store() -> (Docstore, InMemoryBackend) {
    let backend = InMemoryBackend::new();
    let store = Docstore::new(Arc::new(backend.clone()), DocstoreOptions::new("streams"))
        .expect("valid options");
    (store, backend)
}

fn scored(score: i64) -> BTreeMap<String, Value> {
    BTreeMap::from([("score".to_string(), Value::from(score))])
}

#[tokio::test]
async fn document_listener_sees_initial_state_and_changes() {
    let (store, backend) = store();
    store.set(("players", "ada"), scored(1)).await.unwrap();

    let seen: Arc<Mutex<Vec<Option<i64>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let stream = store.get(("players", "ada"));
    let subscription = stream
        .on_next(move |doc| {
            let score = doc
                .as_ref()
                .and_then(|doc| doc.get("score"))
                .and_then(Value::as_i64);
            sink.lock().unwrap().push(score);
        })
        .unwrap();
    assert_eq!(backend.listener_count(), 1);

    store.set(("players", "ada"), scored(2)).await.unwrap();
    store.remove(("players", "ada")).await.unwrap();
    subscription.detach();
    assert_eq!(backend.listener_count(), 0);

    store.set(("players", "ada"), scored(3)).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Some(1), Some(2), None]);
}

#[tokio::test]
async fn one_backend_subscription_per_stream() {
    let (store, backend) = store();
    let stream = store.get(("players", "ada"));

    let first = stream.on_next(|_| {}).unwrap();
    let second = stream.on_next(|_| {}).unwrap();
    assert_eq!(backend.listener_count(), 1);

    drop(first);
    assert_eq!(backend.listener_count(), 1);
    drop(second);
    assert_eq!(backend.listener_count(), 0);

    let err = stream.on_next(|_| {}).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[tokio::test]
async fn await_and_subscribe_are_exclusive() {
    let (store, _backend) = store();

    let awaited = store.get(("players", "ada"));
    assert!(awaited.get().await.unwrap().is_none());
    let err = awaited.on_next(|_| {}).err().unwrap();
    assert_eq!(err.message(), "cannot subscribe after awaiting");

    let observed = store.get(("players", "ada"));
    let _subscription = observed.on_next(|_| {}).unwrap();
    let err = observed.get().await.unwrap_err();
    assert_eq!(err.message(), "cannot await after subscribing");
}

#[tokio::test]
async fn query_listener_follows_matching_documents() {
    let (store, backend) = store();
    let players = store.collection("players").unwrap();
    store.set((&players, "ada"), scored(40)).await.unwrap();
    store.set((&players, "bob"), scored(5)).await.unwrap();

    let query = players
        .query()
        .where_field("score", FilterOperator::GreaterThan, 10)
        .order_by("score", OrderDirection::Descending);
    let stream = store.query(&query);
    assert_eq!(stream.request().unwrap()["query"]["from"], "players");

    let ids: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ids);
    let _subscription = stream
        .on_next(move |docs| {
            sink.lock()
                .unwrap()
                .push(docs.iter().map(|doc| doc.id().to_string()).collect());
        })
        .unwrap();

    store.set((&players, "cyd"), scored(99)).await.unwrap();
    assert_eq!(backend.listener_count(), 1);
    assert_eq!(
        *ids.lock().unwrap(),
        vec![
            vec!["ada".to_string()],
            vec!["cyd".to_string(), "ada".to_string()],
        ]
    );
}

#[tokio::test]
async fn backend_errors_reach_every_error_handler() {
    let (store, backend) = store();
    let stream = store.all(&store.collection("players").unwrap());

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut subscriptions = Vec::new();
    for _ in 0..2 {
        let sink = Arc::clone(&errors);
        subscriptions.push(
            stream
                .on(Observer::new().with_error(move |err| {
                    sink.lock().unwrap().push(err.code_str().to_string());
                }))
                .unwrap(),
        );
    }
    backend.broadcast_error(unavailable("connection lost"));

    assert_eq!(
        *errors.lock().unwrap(),
        vec!["docstore/unavailable", "docstore/unavailable"]
    );
}

#[tokio::test]
async fn get_many_listener_waits_for_every_document() {
    let (store, backend) = store();
    let players = store.collection("players").unwrap();
    store.set((&players, "ada"), scored(1)).await.unwrap();

    let snapshots: Arc<Mutex<Vec<Vec<bool>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&snapshots);
    let subscription = store
        .get_many(&players, ["ada", "bob"], false)
        .on_next(move |docs| {
            sink.lock()
                .unwrap()
                .push(docs.iter().map(Option::is_some).collect());
        })
        .unwrap();
    assert_eq!(backend.listener_count(), 2);

    store.set((&players, "bob"), scored(2)).await.unwrap();
    drop(subscription);
    assert_eq!(backend.listener_count(), 0);

    assert_eq!(
        *snapshots.lock().unwrap(),
        vec![vec![true, false], vec![true, true]]
    );
}
