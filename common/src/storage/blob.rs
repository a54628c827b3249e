// Blob store capability used as the backup destination

use crate::errors::StorageError;
use async_trait::async_trait;
use std::sync::Arc;

/// Object store keyed by (namespace, key)
///
/// `get` and `list` report a missing key or namespace as
/// `StorageError::NotFound`; every other failure is a different variant.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, namespace: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    async fn get(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Keys in `namespace` starting with `prefix`, relative to the namespace
    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Opens a blob store handle from a job's destination token
#[async_trait]
pub trait DestinationProvider: Send + Sync {
    async fn open(&self, token: &str) -> Result<Arc<dyn BlobStore>, StorageError>;
}
