//! Structures to persist and retrieve arbitrary binary data

use super::BoxedError;
use async_trait::async_trait;

mod memory;
mod s3;

pub use self::memory::InMemoryStorageBackend;
pub use self::s3::{S3StorageBackend, S3StorageError};

/// Generic storage backend providing read and write access
///
/// Implementations have to be safe for concurrent use with distinct paths.
#[async_trait]
pub trait StorageBackend {
    /// Retrieves a pre-signed link which can be used by anyone to read a given resource
    fn presign_get(&self, path: &str, expiry_secs: u32) -> Result<String, BoxedError>;

    /// Retrieves the content of a stored object
    async fn get_object(&self, path: &str) -> Result<Vec<u8>, BoxedError>;

    /// Creates a new object at the given path
    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), BoxedError>;
}
