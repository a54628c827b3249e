// Source connectors and the registry that builds them from credentials

pub mod database;

use crate::errors::ConnectorError;
use crate::models::{ConnectorType, Credential};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One transferable unit of a source
///
/// `key` is the destination key the item is stored under and the value
/// reconciliation compares. `locator` is whatever the connector needs to
/// download it again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceItem {
    pub key: String,
    pub locator: String,
}

/// One page of a source listing
#[derive(Debug, Clone, Default)]
pub struct ItemBatch {
    pub items: Vec<SourceItem>,
    /// `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

/// Live connection to an external source
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn fetch_batch(&self, cursor: Option<String>) -> Result<ItemBatch, ConnectorError>;

    async fn download(&self, item: &SourceItem) -> Result<Vec<u8>, ConnectorError>;

    /// Stable identity of the connected account. Mail sources report the
    /// mailbox address; database sources have none.
    async fn account_identity(&self) -> Result<Option<String>, ConnectorError> {
        Ok(None)
    }
}

/// Opens a connector for a credential. A successful connect is the live
/// credential check.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Arc<dyn SourceConnector>, ConnectorError>;
}

/// Connector factories by connector type
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<ConnectorType, Arc<dyn ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in database sources. Mail providers are
    /// registered by the embedding service.
    pub fn with_database_sources(page_size: usize, connect_timeout: Duration) -> Self {
        Self::new()
            .register(
                ConnectorType::DbPostgres,
                Arc::new(database::PostgresSourceFactory::new(page_size, connect_timeout)),
            )
            .register(
                ConnectorType::DbMysql,
                Arc::new(database::MySqlSourceFactory::new(page_size)),
            )
    }

    pub fn register(
        mut self,
        connector: ConnectorType,
        factory: Arc<dyn ConnectorFactory>,
    ) -> Self {
        self.factories.insert(connector, factory);
        self
    }

    pub fn supports(&self, connector: ConnectorType) -> bool {
        self.factories.contains_key(&connector)
    }

    #[tracing::instrument(skip(self, credential))]
    pub async fn connect(
        &self,
        connector: ConnectorType,
        credential: &Credential,
    ) -> Result<Arc<dyn SourceConnector>, ConnectorError> {
        let factory = self
            .factories
            .get(&connector)
            .ok_or(ConnectorError::Unsupported(connector))?;
        factory.connect(credential).await
    }
}
