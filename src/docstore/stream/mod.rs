//! Dual one-shot / live-subscription result type returned by every read.

mod observer;
mod result_stream;

pub use observer::{Emitter, ErrorFn, NextFn, Observer, Unsubscribe};
pub use result_stream::{FetchOnce, ResultStream, SubscribeFn, Subscription};
