use std::sync::Arc;

use crate::docstore::error::{DocstoreError, DocstoreResult};

pub type NextFn<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;
pub type ErrorFn = Arc<dyn Fn(&DocstoreError) + Send + Sync + 'static>;

/// Callback pair attached to a [`ResultStream`](super::ResultStream).
///
/// Either side may be omitted; events with no handler are dropped.
pub struct Observer<T> {
    pub next: Option<NextFn<T>>,
    pub error: Option<ErrorFn>,
}

impl<T> Observer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_next<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.next = Some(Arc::new(callback));
        self
    }

    pub fn with_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DocstoreError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(callback));
        self
    }

    pub(crate) fn notify(&self, event: &DocstoreResult<T>) {
        match event {
            Ok(value) => {
                if let Some(next) = &self.next {
                    next(value);
                }
            }
            Err(err) => {
                if let Some(error) = &self.error {
                    error(err);
                }
            }
        }
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            next: self.next.clone(),
            error: self.error.clone(),
        }
    }
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Self {
            next: None,
            error: None,
        }
    }
}

/// Stops an underlying backend subscription. Called at most once.
pub type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// Callback a backend subscription pushes results and errors into.
pub type Emitter<T> = Arc<dyn Fn(DocstoreResult<T>) + Send + Sync + 'static>;
