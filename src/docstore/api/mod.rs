mod client;
mod mutations;
mod options;
pub(crate) mod query;
mod reference;
mod snapshot;
mod transaction;
mod write_batch;

pub use client::Docstore;
pub use options::DocstoreOptions;
pub use query::{FilterOperator, OrderDirection, Query};
pub use reference::{Collection, DocRef, DocTarget};
pub use snapshot::{Doc, SnapshotMetadata};
pub use transaction::{TransactionReader, TransactionWriter};
pub use write_batch::Batch;
