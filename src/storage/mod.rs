//! Storage collaborators and the ledger built on top of them.
//!
//! The object store and document database are consumed through the two narrow
//! traits below. [`ledger`] turns their primitive operations into the batch
//! semantics (reserve, compensate, commit a primary/derived pair). [`memory`]
//! and [`fs`] are concrete backends used by the CLI and the tests.

pub mod fs;
pub mod ledger;
pub mod memory;

use crate::error::StoreError;
use crate::model::{CollectionId, FileId, NewFileRecord};
use async_trait::async_trait;

pub use fs::FsObjectStore;
pub use ledger::{Ledger, Reservation};
pub use memory::{MemoryDatabase, MemoryObjectStore};

/// Blob storage for finished assets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError>;

    /// Public URL for a stored object.
    async fn get_url(&self, key: &str) -> Result<String, StoreError>;

    /// Remove an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Collection counters and file records.
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    /// Atomically add `delta` to the item counter of `owner`'s collection
    /// named `collection`, returning the collection's id.
    ///
    /// Must be a single atomic operation in the database, never a
    /// read-modify-write in the caller. Returns [`StoreError::NotFound`] when
    /// the collection does not exist for this owner.
    async fn increment_counter(
        &self,
        owner: &str,
        collection: &str,
        delta: i64,
    ) -> Result<CollectionId, StoreError>;

    /// Insert a file record and return its new id.
    async fn insert_file(&self, record: NewFileRecord) -> Result<FileId, StoreError>;
}
