//! Storage backends for persisting the search index.
//!
//! # Storage Abstractions
//!
//! [`DocumentStore`] is a KV store with O(log n) lookups for chunks,
//! embeddings, postings and file records. All mutations are staged in a
//! [`WriteBatch`] and committed atomically.
//!
//! # Implementations
//!
//! - [`InMemoryDocumentStore`] - volatile, for tests and throwaway indexes
//! - [`RedbDocumentStore`] - on-disk redb database (feature `redb-store`)

mod document_store;

#[cfg(feature = "redb-store")]
mod redb_store;

pub use document_store::{DocumentStore, InMemoryDocumentStore, StoreError, WriteBatch, WriteOp};

#[cfg(feature = "redb-store")]
pub use redb_store::RedbDocumentStore;

/// Schema version written by this build.
///
/// Opening a store with a newer version fails with
/// [`StoreError::SchemaMismatch`]; older versions are upgraded in place.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
