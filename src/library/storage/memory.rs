//! Process-local storage used for single-host runs and tests

use super::StorageBackend;
use crate::library::BoxedError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

type ObjectMap = Arc<Mutex<HashMap<String, Vec<u8>>>>;

lazy_static! {
    static ref NAMED_STORES: Mutex<HashMap<String, ObjectMap>> = Mutex::new(HashMap::new());
}

/// Errors raised by the [`InMemoryStorageBackend`]
#[derive(Error, Debug)]
pub enum InMemoryStorageError {
    /// No object is stored at the requested path
    #[error("object not found: {0}")]
    NotFound(String),
    /// A thread panicked while holding the store lock
    #[error("storage lock poisoned")]
    Poisoned,
}

/// [`StorageBackend`] keeping objects in memory
///
/// Instances created through [`named`](InMemoryStorageBackend::named) with the same name share their objects,
/// which allows multiple participants within one process to exchange payloads.
#[derive(Clone)]
pub struct InMemoryStorageBackend {
    name: String,
    objects: ObjectMap,
}

impl InMemoryStorageBackend {
    /// Creates a new, isolated store
    pub fn new() -> Self {
        Self {
            name: uuid::Uuid::new_v4().to_string(),
            objects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attaches to the process-wide store with the given name, creating it if it does not exist yet
    pub fn named(name: &str) -> Self {
        let objects = match NAMED_STORES.lock() {
            Ok(mut stores) => stores
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
                .clone(),
            Err(_) => Arc::new(Mutex::new(HashMap::new())),
        };

        Self {
            name: name.to_string(),
            objects,
        }
    }

    /// Number of objects currently stored
    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or_default()
    }

    /// Whether the store contains no objects
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStorageBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorageBackend {
    fn presign_get(&self, path: &str, _expiry_secs: u32) -> Result<String, BoxedError> {
        Ok(format!("memory://{}/{}", self.name, path))
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, BoxedError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| InMemoryStorageError::Poisoned)?;

        objects
            .get(path)
            .cloned()
            .ok_or_else(|| InMemoryStorageError::NotFound(path.to_string()).into())
    }

    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), BoxedError> {
        self.objects
            .lock()
            .map_err(|_| InMemoryStorageError::Poisoned)?
            .insert(path.to_string(), content.to_vec());

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;

    #[tokio::test]
    async fn return_stored_objects() {
        let backend = InMemoryStorageBackend::new();
        backend.put_object("a", &[1, 2, 3]).await.unwrap();

        assert_eq!(backend.get_object("a").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn fail_on_missing_object() {
        let backend = InMemoryStorageBackend::new();
        assert!(backend.get_object("missing").await.is_err());
    }

    #[tokio::test]
    async fn share_objects_by_name() {
        let writer = InMemoryStorageBackend::named("storage-share-test");
        let reader = InMemoryStorageBackend::named("storage-share-test");

        writer.put_object("key", b"value").await.unwrap();

        assert_eq!(reader.get_object("key").await.unwrap(), b"value".to_vec());
    }

    #[test]
    fn presign_within_namespace() {
        let backend = InMemoryStorageBackend::named("links");
        assert_eq!(backend.presign_get("k", 10).unwrap(), "memory://links/k");
    }
}
