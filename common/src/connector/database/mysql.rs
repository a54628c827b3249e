// MySQL source

use super::{parse_cursor, table_batch, validate_identifier, write_csv, TableRef};
use crate::connector::{ConnectorFactory, ItemBatch, SourceConnector, SourceItem};
use crate::errors::ConnectorError;
use crate::models::{ConnectorType, Credential};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use mysql_async::prelude::*;
use mysql_async::{OptsBuilder, Pool, Value};
use std::sync::Arc;

/// Opens MySQL sources from database credentials
pub struct MySqlSourceFactory {
    page_size: usize,
}

impl MySqlSourceFactory {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }
}

#[async_trait]
impl ConnectorFactory for MySqlSourceFactory {
    #[tracing::instrument(skip(self, credential), fields(database_type = "mysql"))]
    async fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Arc<dyn SourceConnector>, ConnectorError> {
        let Credential::Database(db) = credential else {
            return Err(ConnectorError::CredentialMismatch(ConnectorType::DbMysql));
        };
        let port = db
            .port_number()
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

        let opts = OptsBuilder::default()
            .ip_or_hostname(db.host.clone())
            .tcp_port(port)
            .user(Some(db.username.clone()))
            .pass(Some(db.password.clone()))
            .db_name(Some(db.database_name.clone()));
        let pool = Pool::new(opts);

        // Take one connection now so a bad credential fails the connect
        let conn = pool.get_conn().await.map_err(|e| {
            ConnectorError::ConnectionFailed(format!("Failed to connect to MySQL: {}", e))
        })?;
        drop(conn);

        tracing::info!(host = %db.host, database = %db.database_name, "Connected to MySQL source");

        Ok(Arc::new(MySqlSource {
            pool,
            page_size: self.page_size,
            snapshot: Utc::now().date_naive(),
        }))
    }
}

/// Live MySQL source
pub struct MySqlSource {
    pool: Pool,
    page_size: usize,
    snapshot: NaiveDate,
}

fn query_error(e: mysql_async::Error) -> ConnectorError {
    ConnectorError::QueryFailed(format!("MySQL query failed: {}", e))
}

fn cell_to_string(value: Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        other => Some(other.as_sql(true).trim_matches('\'').to_string()),
    }
}

#[async_trait]
impl SourceConnector for MySqlSource {
    #[tracing::instrument(skip(self))]
    async fn fetch_batch(&self, cursor: Option<String>) -> Result<ItemBatch, ConnectorError> {
        let offset = parse_cursor(cursor)?;
        let mut conn = self.pool.get_conn().await.map_err(query_error)?;

        let rows: Vec<(String, String)> = conn
            .exec(
                r#"
                SELECT table_schema, table_name
                FROM information_schema.tables
                WHERE table_type = 'BASE TABLE' AND table_schema = DATABASE()
                ORDER BY table_name
                LIMIT ? OFFSET ?
                "#,
                (self.page_size as u64, offset),
            )
            .await
            .map_err(query_error)?;

        let tables: Vec<TableRef> = rows
            .into_iter()
            .map(|(schema, table)| TableRef::new(schema, table))
            .collect();

        tracing::debug!(count = tables.len(), offset, "Listed MySQL tables");
        Ok(table_batch(tables, offset, self.page_size, self.snapshot))
    }

    #[tracing::instrument(skip(self), fields(key = %item.key))]
    async fn download(&self, item: &SourceItem) -> Result<Vec<u8>, ConnectorError> {
        let table = TableRef::from_locator(&item.locator)?;
        let mut conn = self.pool.get_conn().await.map_err(query_error)?;

        let columns: Vec<String> = conn
            .exec(
                r#"
                SELECT column_name
                FROM information_schema.columns
                WHERE table_schema = ? AND table_name = ?
                ORDER BY ordinal_position
                "#,
                (&table.schema, &table.table),
            )
            .await
            .map_err(query_error)?;

        if columns.is_empty() {
            return Err(ConnectorError::ItemNotFound(item.locator.clone()));
        }
        for column in &columns {
            validate_identifier(column)?;
        }

        let select_list = columns
            .iter()
            .map(|c| format!("CAST(`{}` AS CHAR)", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM `{}`.`{}`",
            select_list, table.schema, table.table
        );

        let rows: Vec<mysql_async::Row> = conn
            .query(sql)
            .await
            .map_err(|e| ConnectorError::ExportFailed(e.to_string()))?;

        let records: Vec<Vec<Option<String>>> = rows
            .into_iter()
            .map(|mut row| {
                (0..row.len())
                    .map(|i| row.take::<Value, _>(i).and_then(cell_to_string))
                    .collect()
            })
            .collect();

        tracing::info!(rows = records.len(), table = %table.locator(), "Exported MySQL table");
        write_csv(&columns, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(Value::NULL), None);
        assert_eq!(cell_to_string(Value::Bytes(b"abc".to_vec())), Some("abc".to_string()));
        assert_eq!(cell_to_string(Value::Int(-4)), Some("-4".to_string()));
    }
}
