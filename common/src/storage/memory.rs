// In-memory blob store

use super::blob::{BlobStore, DestinationProvider};
use crate::errors::StorageError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Faults {
    list_error: Option<String>,
    failing_keys: HashSet<String>,
}

/// Blob store held in process memory
#[derive(Default)]
pub struct MemoryBlobStore {
    namespaces: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    faults: Mutex<Faults>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `list` call fail with a non-NotFound error
    pub async fn fail_listing(&self, reason: impl Into<String>) {
        self.faults.lock().await.list_error = Some(reason.into());
    }

    /// Make `put` fail for one key in any namespace
    pub async fn fail_put(&self, key: impl Into<String>) {
        self.faults.lock().await.failing_keys.insert(key.into());
    }

    /// Keys of a namespace, sorted
    pub async fn keys(&self, namespace: &str) -> Vec<String> {
        self.namespaces
            .lock()
            .await
            .get(namespace)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, namespace: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        if self.faults.lock().await.failing_keys.contains(key) {
            return Err(StorageError::ObjectStore(format!("injected put failure for {}", key)));
        }
        self.namespaces
            .lock()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.namespaces
            .lock()
            .await
            .get(namespace)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", namespace, key)))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        if let Some(objects) = self.namespaces.lock().await.get_mut(namespace) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        if let Some(reason) = &self.faults.lock().await.list_error {
            return Err(StorageError::ObjectStore(reason.clone()));
        }

        let namespaces = self.namespaces.lock().await;
        let objects = namespaces
            .get(namespace)
            .ok_or_else(|| StorageError::NotFound(format!("namespace {}", namespace)))?;

        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Hands out one shared in-memory store for every non-empty token
#[derive(Clone, Default)]
pub struct MemoryDestinations {
    store: Arc<MemoryBlobStore>,
}

impl MemoryDestinations {
    pub fn new(store: Arc<MemoryBlobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<MemoryBlobStore> {
        Arc::clone(&self.store)
    }
}

#[async_trait]
impl DestinationProvider for MemoryDestinations {
    async fn open(&self, token: &str) -> Result<Arc<dyn BlobStore>, StorageError> {
        if token.trim().is_empty() {
            return Err(StorageError::InvalidToken("empty destination token".to_string()));
        }
        let store: Arc<dyn BlobStore> = self.store.clone();
        Ok(store)
    }
}
