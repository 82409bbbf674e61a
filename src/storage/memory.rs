//! In-process backends.
//!
//! [`MemoryDatabase`] serialises every counter update behind one lock, which
//! gives the same atomicity a real database's `$inc` would. Both types are
//! cheap to share behind an `Arc` and expose inspection helpers for tests.

use crate::error::StoreError;
use crate::model::{CollectionId, FileId, FileRecord, NewFileRecord};
use crate::storage::{DocumentDatabase, ObjectStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug)]
struct Collection {
    id: CollectionId,
    file_count: i64,
}

#[derive(Debug, Default)]
struct DbState {
    collections: HashMap<(String, String), Collection>,
    files: Vec<FileRecord>,
    next_id: u64,
}

impl DbState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:06}", self.next_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<DbState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `owner`'s collection `name` with a zero counter. Idempotent.
    pub fn create_collection(&self, owner: &str, name: &str) -> CollectionId {
        let mut state = self.lock();
        let key = (owner.to_string(), name.to_string());
        if let Some(existing) = state.collections.get(&key) {
            return existing.id.clone();
        }
        let id = CollectionId(state.next_id("col"));
        state.collections.insert(
            key,
            Collection {
                id: id.clone(),
                file_count: 0,
            },
        );
        id
    }

    /// Current item counter, or `None` if the collection doesn't exist.
    pub fn file_count(&self, owner: &str, name: &str) -> Option<i64> {
        self.lock()
            .collections
            .get(&(owner.to_string(), name.to_string()))
            .map(|c| c.file_count)
    }

    /// Snapshot of all stored file records in insertion order.
    pub fn files(&self) -> Vec<FileRecord> {
        self.lock().files.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DbState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    async fn increment_counter(
        &self,
        owner: &str,
        collection: &str,
        delta: i64,
    ) -> Result<CollectionId, StoreError> {
        let mut state = self.lock();
        let entry = state
            .collections
            .get_mut(&(owner.to_string(), collection.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                what: format!("collection '{collection}' for '{owner}'"),
            })?;
        entry.file_count += delta;
        Ok(entry.id.clone())
    }

    async fn insert_file(&self, record: NewFileRecord) -> Result<FileId, StoreError> {
        let mut state = self.lock();
        let id = FileId(state.next_id("file"));
        state.files.push(FileRecord {
            id: id.clone(),
            record,
        });
        Ok(id)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Bytes and content type of a stored object.
    pub fn object(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.lock()
            .get(key)
            .map(|o| (o.bytes.clone(), o.content_type.clone()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError> {
        self.lock().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get_url(&self, key: &str) -> Result<String, StoreError> {
        if !self.contains(key) {
            return Err(StoreError::NotFound {
                what: format!("object '{key}'"),
            });
        }
        Ok(format!("memory://{key}"))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove(key);
        Ok(())
    }
}
