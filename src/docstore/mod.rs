//! Typed document data-access layer.
//!
//! Reads return a [`ResultStream`] that is either awaited once or observed
//! live. Writes go through [`Docstore`] directly, through an atomic
//! [`Batch`], or through [`Docstore::transaction`]. Every value crossing the
//! [`Backend`](backend::Backend) boundary is converted by the
//! [`Marshaller`](marshal::Marshaller).
//!
//! ```
//! use std::collections::BTreeMap;
//! use docwire::docstore::{Docstore, Value};
//!
//! # futures::executor::block_on(async {
//! let store = Docstore::in_memory();
//! let data = BTreeMap::from([("name".to_string(), Value::from("Ada"))]);
//! store.set(("users", "ada"), data).await?;
//!
//! let doc = store.get(("users", "ada")).await?;
//! assert_eq!(doc.unwrap().get("name"), Some(&Value::from("Ada")));
//! # Ok::<(), docwire::docstore::DocstoreError>(())
//! # }).unwrap();
//! ```

pub mod api;
pub mod backend;
pub(crate) mod constants;
pub mod environment;
pub mod error;
pub mod logger;
pub mod marshal;
pub mod model;
pub mod stream;
pub mod update;
pub mod value;

pub use api::{
    Batch, Collection, Doc, DocRef, DocTarget, Docstore, DocstoreOptions, FilterOperator,
    OrderDirection, Query, SnapshotMetadata, TransactionReader, TransactionWriter,
};
pub use backend::{Backend, InMemoryBackend, InMemorySettings};
pub use environment::RuntimeEnvironment;
pub use error::{DocstoreError, DocstoreErrorCode, DocstoreResult, ErrorKind};
pub use model::{DatabaseId, FieldPath, GeoPoint, Timestamp};
pub use stream::{Observer, ResultStream, Subscription};
pub use update::{compile_update, field, UpdateBuilder, UpdateData};
pub use value::{BytesValue, Sentinel, Value};
