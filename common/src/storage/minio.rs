// S3-compatible (MinIO) blob store

use super::blob::{BlobStore, DestinationProvider};
use crate::config::BlobStoreConfig;
use crate::errors::StorageError;
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Bucket handle. Namespaces are key prefixes: `{namespace}/{key}`.
#[derive(Clone, Debug)]
pub struct MinioClient {
    bucket: Arc<Bucket>,
}

fn object_store_error(action: &str, path: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::ObjectStore(format!("Failed to {} '{}': {}", action, path, e))
}

/// Map a rust-s3 error, keeping 404s apart from everything else
fn map_s3_error(action: &str, path: &str, e: S3Error) -> StorageError {
    match e {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(path.to_string()),
        other => object_store_error(action, path, other),
    }
}

fn check_status(action: &str, path: &str, status: u16) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(path.to_string())),
        code => Err(object_store_error(action, path, format!("HTTP {}", code))),
    }
}

impl MinioClient {
    /// Connect with the given key pair to the configured bucket
    #[instrument(
        skip(config, access_key, secret_key),
        fields(endpoint = %config.endpoint, bucket = %config.bucket)
    )]
    pub fn new(
        config: &BlobStoreConfig,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        // rust-s3 Region::Custom expects the endpoint without scheme
        let endpoint = config
            .endpoint
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .to_string();

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| {
                error!(error = %e, "Failed to create object store credentials");
                StorageError::ObjectStore(format!("Failed to create credentials: {}", e))
            })?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint,
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::ObjectStore(format!("Failed to create bucket: {}", e)))?
            .with_path_style();

        Ok(Self {
            bucket: Arc::from(bucket),
        })
    }

    fn path(namespace: &str, key: &str) -> String {
        format!("{}/{}", namespace, key)
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StorageError> {
        self.bucket
            .list(String::new(), Some("/".to_string()))
            .await
            .map(|_| ())
            .map_err(|e| {
                error!(error = %e, "Object store health check failed");
                map_s3_error("list", "", e)
            })
    }
}

#[async_trait]
impl BlobStore for MinioClient {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, namespace: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let path = Self::path(namespace, key);
        let response = self
            .bucket
            .put_object(&path, &data)
            .await
            .map_err(|e| map_s3_error("put", &path, e))?;
        check_status("put", &path, response.status_code())?;

        debug!(path = %path, "Object stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, namespace: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = Self::path(namespace, key);
        let response = self
            .bucket
            .get_object(&path)
            .await
            .map_err(|e| map_s3_error("get", &path, e))?;
        check_status("get", &path, response.status_code())?;

        Ok(response.bytes().to_vec())
    }

    #[instrument(skip(self))]
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        let path = Self::path(namespace, key);
        let response = self
            .bucket
            .delete_object(&path)
            .await
            .map_err(|e| map_s3_error("delete", &path, e))?;

        match check_status("delete", &path, response.status_code()) {
            Err(StorageError::NotFound(_)) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Recursive listing. An absent prefix lists as empty; a missing
    /// bucket is `NotFound`.
    #[instrument(skip(self))]
    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let namespace_prefix = format!("{}/", namespace);
        let full_prefix = format!("{}{}", namespace_prefix, prefix);

        let pages = self
            .bucket
            .list(full_prefix.clone(), None)
            .await
            .map_err(|e| map_s3_error("list", &full_prefix, e))?;

        let keys: Vec<String> = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .filter_map(|object| {
                object
                    .key
                    .strip_prefix(&namespace_prefix)
                    .map(str::to_string)
            })
            .collect();

        debug!(prefix = %full_prefix, count = keys.len(), "Objects listed");
        Ok(keys)
    }
}

/// Opens the configured bucket with the key pair carried by a job's
/// destination token, formatted `access_key:secret_key`
#[derive(Clone)]
pub struct MinioDestinations {
    config: BlobStoreConfig,
}

impl MinioDestinations {
    pub fn new(config: BlobStoreConfig) -> Self {
        info!(
            endpoint = %config.endpoint,
            bucket = %config.bucket,
            "Object store destinations configured"
        );
        Self { config }
    }

    /// Client using the service's own key pair
    pub fn service_client(&self) -> Result<MinioClient, StorageError> {
        MinioClient::new(&self.config, &self.config.access_key, &self.config.secret_key)
    }
}

fn split_token(token: &str) -> Result<(&str, &str), StorageError> {
    match token.trim().split_once(':') {
        Some((access, secret)) if !access.is_empty() && !secret.is_empty() => Ok((access, secret)),
        _ => Err(StorageError::InvalidToken(
            "expected access_key:secret_key".to_string(),
        )),
    }
}

#[async_trait]
impl DestinationProvider for MinioDestinations {
    async fn open(&self, token: &str) -> Result<Arc<dyn BlobStore>, StorageError> {
        let (access_key, secret_key) = split_token(token)?;
        let client: Arc<dyn BlobStore> =
            Arc::new(MinioClient::new(&self.config, access_key, secret_key)?);
        Ok(client)
    }
}
