// PostgreSQL source

use super::{parse_cursor, table_batch, write_csv, TableRef};
use crate::connector::{ConnectorFactory, ItemBatch, SourceConnector, SourceItem};
use crate::errors::ConnectorError;
use crate::models::{ConnectorType, Credential};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;

/// Opens PostgreSQL sources from database credentials
pub struct PostgresSourceFactory {
    page_size: usize,
    connect_timeout: Duration,
}

impl PostgresSourceFactory {
    pub fn new(page_size: usize, connect_timeout: Duration) -> Self {
        Self {
            page_size,
            connect_timeout,
        }
    }
}

#[async_trait]
impl ConnectorFactory for PostgresSourceFactory {
    #[tracing::instrument(skip(self, credential), fields(database_type = "postgresql"))]
    async fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Arc<dyn SourceConnector>, ConnectorError> {
        let Credential::Database(db) = credential else {
            return Err(ConnectorError::CredentialMismatch(ConnectorType::DbPostgres));
        };
        let port = db
            .port_number()
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

        let options = PgConnectOptions::new()
            .host(&db.host)
            .port(port)
            .username(&db.username)
            .password(&db.password)
            .database(&db.database_name);

        // connect_with opens one connection up front, which checks the credential
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(self.connect_timeout)
            .connect_with(options)
            .await
            .map_err(|e| {
                ConnectorError::ConnectionFailed(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        tracing::info!(
            host = %db.host,
            database = %db.database_name,
            "Connected to PostgreSQL source"
        );

        Ok(Arc::new(PostgresSource {
            pool,
            page_size: self.page_size,
            snapshot: Utc::now().date_naive(),
        }))
    }
}

/// Live PostgreSQL source
pub struct PostgresSource {
    pool: PgPool,
    page_size: usize,
    snapshot: NaiveDate,
}

impl PostgresSource {
    async fn columns(&self, table: &TableRef) -> Result<Vec<String>, ConnectorError> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&table.schema)
        .bind(&table.table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("column_name"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectorError::QueryFailed(e.to_string()))
    }
}

#[async_trait]
impl SourceConnector for PostgresSource {
    #[tracing::instrument(skip(self))]
    async fn fetch_batch(&self, cursor: Option<String>) -> Result<ItemBatch, ConnectorError> {
        let offset = parse_cursor(cursor)?;

        let rows = sqlx::query(
            r#"
            SELECT table_schema::text AS table_schema, table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema NOT IN ('pg_catalog', 'information_schema')
            ORDER BY table_schema, table_name
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(self.page_size as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            ConnectorError::QueryFailed(format!("PostgreSQL table listing failed: {}", e))
        })?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let schema: String = row
                .try_get("table_schema")
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            let table: String = row
                .try_get("table_name")
                .map_err(|e| ConnectorError::QueryFailed(e.to_string()))?;
            tables.push(TableRef::new(schema, table));
        }

        tracing::debug!(count = tables.len(), offset, "Listed PostgreSQL tables");
        Ok(table_batch(tables, offset, self.page_size, self.snapshot))
    }

    #[tracing::instrument(skip(self), fields(key = %item.key))]
    async fn download(&self, item: &SourceItem) -> Result<Vec<u8>, ConnectorError> {
        let table = TableRef::from_locator(&item.locator)?;
        let columns = self.columns(&table).await?;
        if columns.is_empty() {
            return Err(ConnectorError::ItemNotFound(item.locator.clone()));
        }

        // Cast every column to text so any column type exports the same way
        let select_list = columns
            .iter()
            .map(|c| format!("\"{}\"::text", c.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM \"{}\".\"{}\"",
            select_list, table.schema, table.table
        );

        let mut rows = sqlx::query(&sql).fetch(&self.pool);
        let mut records = Vec::new();
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| ConnectorError::ExportFailed(e.to_string()))?
        {
            let record = (0..columns.len())
                .map(|i| row.try_get::<Option<String>, _>(i))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConnectorError::ExportFailed(e.to_string()))?;
            records.push(record);
        }

        tracing::info!(rows = records.len(), table = %table.locator(), "Exported PostgreSQL table");
        write_csv(&columns, records)
    }
}
