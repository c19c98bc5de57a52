//! Trait implementations for [Amazon S3](https://aws.amazon.com/s3/) compatible storage providers

use super::StorageBackend;
use crate::library::BoxedError;
use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use thiserror::Error;
use tracing::trace;

const STATUS_OK: u16 = 200;

/// Error type for S3 specific errors
#[derive(Error, Debug)]
pub enum S3StorageError {
    /// Requested object can not be retrieved
    ///
    /// The HTTP status code and error message are provided.
    #[error("object unavailable (status code {0}): {1}")]
    ObjectUnavailable(u16, String),
    /// Internal black-box error caused by the S3 implementation
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Storage backend for AWS S3 compatible servers
#[derive(Clone)]
pub struct S3StorageBackend {
    bucket: Bucket,
}

impl S3StorageBackend {
    /// Creates a new S3 backend connection to a pre-existing bucket using the provided credentials
    pub fn new(
        region: Region,
        credentials: Credentials,
        bucket: &str,
        path_style: bool,
    ) -> Result<Self, S3StorageError> {
        let mut bucket =
            Bucket::new(bucket, region, credentials).map_err(|e| anyhow::anyhow!("{}", e))?;

        if path_style {
            bucket.set_path_style();
        }

        Ok(Self { bucket })
    }

    /// Creates a backend for a custom endpoint (e.g. minio) using static credentials
    pub fn with_static_credentials(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        path_style: bool,
    ) -> Result<Self, S3StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        Self::new(region, credentials, bucket, path_style)
    }

    fn handle_response(&self, response: (Vec<u8>, u16)) -> Result<Vec<u8>, S3StorageError> {
        let (data, code) = response;

        if code != STATUS_OK {
            let reason = String::from_utf8_lossy(&data).to_string();
            Err(S3StorageError::ObjectUnavailable(code, reason))
        } else {
            Ok(data)
        }
    }
}

#[async_trait]
impl StorageBackend for S3StorageBackend {
    fn presign_get(&self, path: &str, expiry_secs: u32) -> Result<String, BoxedError> {
        Ok(self.bucket.presign_get(path, expiry_secs)?)
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, BoxedError> {
        trace!(path, "Fetching object");
        let response = self.bucket.get_object(path).await?;
        Ok(self.handle_response(response)?)
    }

    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), BoxedError> {
        trace!(path, size = content.len(), "Storing object");
        let response = self.bucket.put_object(path, content).await?;
        Ok(self.handle_response(response).map(|_| ())?)
    }
}

/// Tests for the S3 storage backend.
/// Note that these are ignored by default as they require a valid S3 endpoint running.
/// The simplest way is to fire up a local minio instance with the details listed in the constants.
///
/// ```bash
/// minio server /tmp/fedlink-minio
/// mc alias set fedlink-test http://127.0.0.1:9000 minioadmin minioadmin
/// mc mb fedlink-test/rust-fedlink-test
/// ```
#[cfg(test)]
mod does {
    use super::*;
    use uuid::Uuid;

    const S3_TEST_BACKEND: &str = "http://127.0.0.1:9000";
    const S3_TEST_BUCKET: &str = "rust-fedlink-test";
    const S3_TEST_ACCESS_KEY: &str = "minioadmin";
    const S3_TEST_SECRET_KEY: &str = "minioadmin";
    const TEST_FILE_CONTENT: &[u8] = &[1, 2, 3, 4];

    fn test_backend() -> S3StorageBackend {
        S3StorageBackend::with_static_credentials(
            S3_TEST_BACKEND,
            S3_TEST_BUCKET,
            S3_TEST_BUCKET,
            S3_TEST_ACCESS_KEY,
            S3_TEST_SECRET_KEY,
            true,
        )
        .unwrap()
    }

    #[ignore]
    #[tokio::test]
    async fn provide_file_access() {
        let backend = test_backend();
        let path = Uuid::new_v4().to_string();

        backend.put_object(&path, TEST_FILE_CONTENT).await.unwrap();
        assert_eq!(TEST_FILE_CONTENT, backend.get_object(&path).await.unwrap());

        backend.bucket.delete_object(&path).await.unwrap();
    }

    #[ignore]
    #[tokio::test]
    async fn fail_on_file_not_found() {
        let backend = test_backend();
        let path = Uuid::new_v4().to_string();

        assert!(backend.get_object(&path).await.is_err());
    }

    #[ignore]
    #[test]
    fn provide_get_link() {
        let backend = test_backend();
        let link = backend.presign_get("some-object", 10).unwrap();

        assert!(link.starts_with(S3_TEST_BACKEND));
    }
}
