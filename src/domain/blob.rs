use crate::library::storage::StorageBackend;
use crate::library::BoxedError;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Default validity of retrieval links (7 days, the maximum S3 permits)
pub const DEFAULT_URL_EXPIRY_SECS: u32 = 7 * 24 * 60 * 60;

/// Errors raised while offloading or resolving payloads
#[derive(Error, Debug)]
pub enum BlobStoreError {
    /// The storage backend failed to write or read an object
    #[error("blob store unavailable while accessing {key}")]
    Unavailable {
        /// Key of the affected object
        key: String,
        /// Underlying cause
        source: BoxedError,
    },
    /// A stored object is not valid JSON
    #[error("blob {key} is corrupt")]
    Corrupt {
        /// Key of the affected object
        key: String,
        /// Underlying cause
        source: serde_json::Error,
    },
}

/// Key-value client storing JSON payloads on a [`StorageBackend`]
///
/// Stateless per call and safe for concurrent use as long as keys are unique.
#[derive(Clone)]
pub struct BlobStore {
    backend: Arc<dyn StorageBackend + Send + Sync>,
    url_expiry_secs: u32,
}

impl BlobStore {
    /// Creates a new client on top of the given backend
    pub fn new(backend: Arc<dyn StorageBackend + Send + Sync>, url_expiry_secs: u32) -> Self {
        Self {
            backend,
            url_expiry_secs,
        }
    }

    /// Generates a globally unique key for a payload sent on the given channel
    pub fn key_for(channel: &str) -> String {
        format!("{}_{}", channel, Uuid::new_v4())
    }

    /// Stores a value and returns a link which can be used to retrieve it
    #[instrument(skip(self, value))]
    pub async fn write(&self, key: &str, value: &Value) -> Result<String, BlobStoreError> {
        let content = serde_json::to_vec(value).map_err(|source| BlobStoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;

        let unavailable = |source| BlobStoreError::Unavailable {
            key: key.to_string(),
            source,
        };

        self.backend
            .put_object(key, &content)
            .await
            .map_err(unavailable)?;

        debug!(size = content.len(), "Stored blob");

        self.backend
            .presign_get(key, self.url_expiry_secs)
            .map_err(unavailable)
    }

    /// Retrieves a previously stored value
    #[instrument(skip(self))]
    pub async fn read(&self, key: &str) -> Result<Value, BlobStoreError> {
        let content = self
            .backend
            .get_object(key)
            .await
            .map_err(|source| BlobStoreError::Unavailable {
                key: key.to_string(),
                source,
            })?;

        debug!(size = content.len(), "Retrieved blob");

        serde_json::from_slice(&content).map_err(|source| BlobStoreError::Corrupt {
            key: key.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::storage::InMemoryStorageBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn return_written_values() {
        let store = BlobStore::new(Arc::new(InMemoryStorageBackend::named("blob-test")), 60);
        let value = json!({ "weights": [0.5, 1.5] });

        let url = store.write("some-key", &value).await.unwrap();

        assert_eq!(url, "memory://blob-test/some-key");
        assert_eq!(store.read("some-key").await.unwrap(), value);
    }

    #[tokio::test]
    async fn report_missing_blobs_as_unavailable() {
        let store = BlobStore::new(Arc::new(InMemoryStorageBackend::new()), 60);

        assert!(matches!(
            store.read("missing").await,
            Err(BlobStoreError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn report_corrupt_blobs() {
        let backend = Arc::new(InMemoryStorageBackend::new());
        backend.put_object("broken", b"{").await.unwrap();
        let store = BlobStore::new(backend, 60);

        assert!(matches!(
            store.read("broken").await,
            Err(BlobStoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn derive_unique_keys_from_channels() {
        let first = BlobStore::key_for("fedml_42_7");
        let second = BlobStore::key_for("fedml_42_7");

        assert!(first.starts_with("fedml_42_7_"));
        assert_ne!(first, second);
    }
}
