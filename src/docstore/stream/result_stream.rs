use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_lock::OnceCell;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value as JsonValue;

use crate::docstore::error::{usage_error, DocstoreResult};
use crate::docstore::logger::LOGGER;

use super::observer::{Emitter, Observer, Unsubscribe};

/// Produces the one-shot result. Invoked at most once per stream.
pub type FetchOnce<T> = Box<dyn FnOnce() -> BoxFuture<'static, DocstoreResult<T>> + Send>;

type PendingFetch<T> = Shared<BoxFuture<'static, DocstoreResult<T>>>;

/// Registers a live subscription. Invoked at most once per stream.
pub type SubscribeFn<T> = Box<dyn FnOnce(Emitter<T>) -> Unsubscribe + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Awaiting,
    Subscribed,
    Terminated,
}

struct State<T> {
    phase: Phase,
    fetch: Option<FetchOnce<T>>,
    /// In-flight fetch, kept until it settles so a dropped await can resume.
    pending: Option<PendingFetch<T>>,
    subscribe: Option<SubscribeFn<T>>,
    listeners: Vec<(u64, Observer<T>)>,
    unsubscribe: Option<Unsubscribe>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    settled: OnceCell<DocstoreResult<T>>,
    listener_counter: AtomicU64,
    request: Option<JsonValue>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_out(&self, event: DocstoreResult<T>) {
        let observers: Vec<Observer<T>> = {
            let state = self.lock();
            if state.phase != Phase::Subscribed {
                return;
            }
            state
                .listeners
                .iter()
                .map(|(_, observer)| observer.clone())
                .collect()
        };
        if let Err(err) = &event {
            LOGGER.debug(format!(
                "Delivering subscription error to {} listener(s): {err}",
                observers.len()
            ));
        }
        for observer in observers {
            observer.notify(&event);
        }
    }

    fn remove_listener(&self, listener_id: u64) {
        let unsubscribe = {
            let mut state = self.lock();
            state.listeners.retain(|(id, _)| *id != listener_id);
            if !state.listeners.is_empty() || state.phase != Phase::Subscribed {
                return;
            }
            state.phase = Phase::Terminated;
            state.unsubscribe.take()
        };
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }
}

/// Result of a read that can either be awaited once or observed live.
///
/// Awaiting calls the fetch function exactly once and replays the memoized
/// result to every later await. Attaching listeners starts exactly one
/// backend subscription shared by all of them; it is stopped when the last
/// listener detaches. The two paths are mutually exclusive per stream.
pub struct ResultStream<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ResultStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ResultStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(fetch: FetchOnce<T>, subscribe: SubscribeFn<T>) -> Self {
        Self::build(fetch, subscribe, None)
    }

    /// Attaches an opaque description of the underlying request.
    pub fn with_request(fetch: FetchOnce<T>, subscribe: SubscribeFn<T>, request: JsonValue) -> Self {
        Self::build(fetch, subscribe, Some(request))
    }

    fn build(fetch: FetchOnce<T>, subscribe: SubscribeFn<T>, request: Option<JsonValue>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    fetch: Some(fetch),
                    pending: None,
                    subscribe: Some(subscribe),
                    listeners: Vec::new(),
                    unsubscribe: None,
                }),
                settled: OnceCell::new(),
                listener_counter: AtomicU64::new(0),
                request,
            }),
        }
    }

    /// Stream whose fetch resolves immediately and whose subscription emits
    /// the same value once.
    pub fn ready(result: DocstoreResult<T>) -> Self {
        let replay = result.clone();
        Self::new(
            Box::new(move || async move { result }.boxed()),
            Box::new(move |emit: Emitter<T>| -> Unsubscribe {
                emit(replay);
                Box::new(|| {})
            }),
        )
    }

    pub fn request(&self) -> Option<&JsonValue> {
        self.inner.request.as_ref()
    }

    /// Resolves the one-shot result.
    ///
    /// Dropping the returned future does not cancel the fetch: the next
    /// await picks up the same in-flight request.
    pub async fn get(&self) -> DocstoreResult<T> {
        let pending = {
            let mut state = self.inner.lock();
            match state.phase {
                Phase::Subscribed | Phase::Terminated => {
                    return Err(usage_error("cannot await after subscribing"));
                }
                Phase::Idle => state.phase = Phase::Awaiting,
                Phase::Awaiting => {}
            }
            if let Some(fetch) = state.fetch.take() {
                state.pending = Some(fetch().shared());
            }
            state.pending.clone()
        };

        let inner = Arc::clone(&self.inner);
        self.inner
            .settled
            .get_or_init(|| async move {
                let result = match pending {
                    Some(pending) => pending.await,
                    None => Err(usage_error("the fetch settled without a result")),
                };
                inner.lock().pending = None;
                result
            })
            .await
            .clone()
    }

    /// Attaches a listener, starting the backend subscription on first use.
    pub fn on(&self, observer: Observer<T>) -> DocstoreResult<Subscription> {
        let listener_id = self.inner.listener_counter.fetch_add(1, Ordering::SeqCst);
        let supplier = {
            let mut state = self.inner.lock();
            match state.phase {
                Phase::Awaiting => return Err(usage_error("cannot subscribe after awaiting")),
                Phase::Terminated => {
                    return Err(usage_error(
                        "cannot subscribe to a stream whose listeners have all detached",
                    ))
                }
                Phase::Idle => state.phase = Phase::Subscribed,
                Phase::Subscribed => {}
            }
            state.listeners.push((listener_id, observer));
            state.subscribe.take()
        };

        if let Some(subscribe) = supplier {
            let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
            let emitter: Emitter<T> = Arc::new(move |event: DocstoreResult<T>| {
                if let Some(inner) = weak.upgrade() {
                    inner.fan_out(event);
                }
            });
            let unsubscribe = subscribe(emitter);
            let mut state = self.inner.lock();
            if state.phase == Phase::Terminated {
                drop(state);
                unsubscribe();
            } else {
                state.unsubscribe = Some(unsubscribe);
            }
        }

        Ok(Subscription {
            owner: self.inner.clone(),
            listener_id,
            detached: false,
        })
    }

    /// Shorthand for a listener that only handles results.
    pub fn on_next<F>(&self, callback: F) -> DocstoreResult<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on(Observer::new().with_next(callback))
    }
}

impl<T> IntoFuture for ResultStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = DocstoreResult<T>;
    type IntoFuture = BoxFuture<'static, DocstoreResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.get().await })
    }
}

trait Detach: Send + Sync {
    fn detach_listener(&self, listener_id: u64);
}

impl<T: Send + Sync> Detach for Inner<T> {
    fn detach_listener(&self, listener_id: u64) {
        self.remove_listener(listener_id);
    }
}

/// Handle for one attached listener. Detaches on drop.
pub struct Subscription {
    owner: Arc<dyn Detach>,
    listener_id: u64,
    detached: bool,
}

impl Subscription {
    pub fn detach(mut self) {
        self.detach_inner();
    }

    fn detach_inner(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.owner.detach_listener(self.listener_id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_inner();
    }
}
