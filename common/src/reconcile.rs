// Source/destination reconciliation: which source keys already exist at the destination

use crate::connector::SourceItem;
use crate::errors::StorageError;
use crate::storage::BlobStore;
use tracing::{debug, instrument};

/// One flag per source key, in source order. Sorts the destination once and
/// binary-searches each source key.
pub fn synced_flags<S: AsRef<str>>(
    source_keys: &[S],
    mut destination_keys: Vec<String>,
) -> Vec<bool> {
    destination_keys.sort_unstable();
    source_keys
        .iter()
        .map(|key| {
            destination_keys
                .binary_search_by(|candidate| candidate.as_str().cmp(key.as_ref()))
                .is_ok()
        })
        .collect()
}

/// List the destination namespace and flag each source key. A namespace
/// that does not exist yet means nothing is synced; any other listing
/// error is returned.
#[instrument(skip(store, source_keys), fields(source_count = source_keys.len()))]
pub async fn reconcile<S: AsRef<str> + Sync>(
    store: &dyn BlobStore,
    namespace: &str,
    source_keys: &[S],
) -> Result<Vec<bool>, StorageError> {
    let destination_keys = match store.list(namespace, "").await {
        Ok(keys) => keys,
        Err(StorageError::NotFound(_)) => {
            debug!(namespace = %namespace, "Destination namespace absent, nothing synced");
            Vec::new()
        }
        Err(e) => return Err(e),
    };

    debug!(destination_count = destination_keys.len(), "Destination listed");
    Ok(synced_flags(source_keys, destination_keys))
}

/// Source items not yet present in the destination namespace
pub async fn unsynced_items(
    store: &dyn BlobStore,
    namespace: &str,
    items: Vec<SourceItem>,
) -> Result<Vec<SourceItem>, StorageError> {
    let keys: Vec<&str> = items.iter().map(|item| item.key.as_str()).collect();
    let flags = reconcile(store, namespace, &keys).await?;

    Ok(items
        .into_iter()
        .zip(flags)
        .filter_map(|(item, synced)| (!synced).then_some(item))
        .collect())
}
