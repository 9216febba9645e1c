//! Blob storage for raw and enriched files.
//!
//! Trait-based so that the job driver can be exercised against the in-memory store, which is
//! always available and needs no conditional compilation.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3SdkClient;
use thiserror::Error;

use crate::retry::RetryableError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

impl RetryableError for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::OperationFailed(_))
    }
}

/// The address of one object: a bucket (or container) and a key within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobLocation {
    pub bucket: String,
    pub key: String,
}

impl BlobLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// The last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>, StoreError>;

    async fn put(&self, location: &BlobLocation, data: Vec<u8>) -> Result<(), StoreError>;
}

pub struct S3BlobStore {
    client: AwsS3SdkClient,
}

impl S3BlobStore {
    pub fn new(client: AwsS3SdkClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!("failed to get {location}: {e}");
                if let aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_) =
                    e.into_service_error()
                {
                    StoreError::NotFound(location.to_string())
                } else {
                    StoreError::OperationFailed(error_message)
                }
            })?;

        let body = output.body.collect().await.map_err(|e| {
            StoreError::OperationFailed(format!("failed to read body of {location}: {e}"))
        })?;

        Ok(body.to_vec())
    }

    async fn put(&self, location: &BlobLocation, data: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .content_type("text/csv; charset=utf-8")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StoreError::OperationFailed(format!("failed to put {location}: {e}")))
            .map(|_| ())
    }
}

/// In-memory store for tests and local runs. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<BlobLocation, Vec<u8>>>>,
    failing_puts: Arc<Mutex<u32>>,
    put_calls: Arc<Mutex<u32>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, location: BlobLocation, data: impl Into<Vec<u8>>) -> Self {
        self.insert(location, data);
        self
    }

    pub fn insert(&self, location: BlobLocation, data: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(location, data.into());
        }
    }

    pub fn object(&self, location: &BlobLocation) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(location).cloned())
    }

    /// Make the next `count` calls to `put` fail with a retryable error.
    #[cfg(any(test, feature = "test-support"))]
    pub fn fail_next_puts(&self, count: u32) {
        if let Ok(mut failing) = self.failing_puts.lock() {
            *failing = count;
        }
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn put_calls(&self) -> u32 {
        self.put_calls.lock().map(|calls| *calls).unwrap_or(0)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>, StoreError> {
        self.object(location)
            .ok_or_else(|| StoreError::NotFound(location.to_string()))
    }

    async fn put(&self, location: &BlobLocation, data: Vec<u8>) -> Result<(), StoreError> {
        if let Ok(mut calls) = self.put_calls.lock() {
            *calls += 1;
        }

        let should_fail = match self.failing_puts.lock() {
            Ok(mut failing) if *failing > 0 => {
                *failing -= 1;
                true
            }
            Ok(_) => false,
            Err(_) => return Err(StoreError::OperationFailed("poisoned store".to_owned())),
        };
        if should_fail {
            return Err(StoreError::OperationFailed(format!(
                "injected failure writing {location}"
            )));
        }

        self.insert(location.clone(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_last_key_segment() {
        let location = BlobLocation::new("bucket", "raw/2024/suppliers.csv");
        assert_eq!(location.file_name(), "suppliers.csv");

        let flat = BlobLocation::new("bucket", "suppliers.csv");
        assert_eq!(flat.file_name(), "suppliers.csv");
        assert_eq!(flat.to_string(), "s3://bucket/suppliers.csv");
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        let location = BlobLocation::new("bucket", "key.csv");

        store
            .put(&location, b"a,b\n".to_vec())
            .await
            .expect("put failed");

        assert_eq!(store.get(&location).await.unwrap(), b"a,b\n".to_vec());
    }

    #[tokio::test]
    async fn test_memory_store_missing_object_is_not_found() {
        let store = MemoryBlobStore::new();
        let result = store.get(&BlobLocation::new("bucket", "missing")).await;

        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_memory_store_injected_put_failures() {
        let store = MemoryBlobStore::new();
        let location = BlobLocation::new("bucket", "key.csv");
        store.fail_next_puts(1);

        let first = store.put(&location, b"x".to_vec()).await;
        assert!(matches!(first, Err(StoreError::OperationFailed(_))));
        assert!(first.unwrap_err().is_retryable());

        store.put(&location, b"x".to_vec()).await.unwrap();
        assert_eq!(store.put_calls(), 2);
        assert_eq!(store.object(&location), Some(b"x".to_vec()));
    }
}
