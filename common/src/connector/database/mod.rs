// Database sources: every user table is exported as one CSV object
//
// Item keys are `{YYYY-MM-DD}/{schema}.{table}.csv` with the snapshot date
// taken when the connector is opened, so reruns on the same day find the
// export already present. The cursor is the table offset.

mod mysql;
mod postgres;

pub use mysql::{MySqlSource, MySqlSourceFactory};
pub use postgres::{PostgresSource, PostgresSourceFactory};

use super::{ItemBatch, SourceItem};
use crate::errors::ConnectorError;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

/// Schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn locator(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Parse a locator back and check both parts are safe to quote
    pub fn from_locator(locator: &str) -> Result<Self, ConnectorError> {
        let (schema, table) = locator
            .split_once('.')
            .ok_or_else(|| ConnectorError::ItemNotFound(locator.to_string()))?;
        validate_identifier(schema)?;
        validate_identifier(table)?;
        Ok(Self::new(schema, table))
    }

    pub fn to_item(&self, snapshot: NaiveDate) -> SourceItem {
        SourceItem {
            key: format!("{}/{}.csv", snapshot.format("%Y-%m-%d"), self.locator()),
            locator: self.locator(),
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,62}$").expect("Invalid regex pattern")
    })
}

/// Identifiers are interpolated into SQL, so only plain names pass
pub fn validate_identifier(name: &str) -> Result<(), ConnectorError> {
    if identifier_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ConnectorError::QueryFailed(format!(
            "unsupported identifier: {:?}",
            name
        )))
    }
}

pub(crate) fn parse_cursor(cursor: Option<String>) -> Result<u64, ConnectorError> {
    match cursor {
        None => Ok(0),
        Some(c) => c
            .parse::<u64>()
            .map_err(|_| ConnectorError::QueryFailed(format!("invalid cursor: {}", c))),
    }
}

/// Build a batch from one page of tables
pub(crate) fn table_batch(
    tables: Vec<TableRef>,
    offset: u64,
    page_size: usize,
    snapshot: NaiveDate,
) -> ItemBatch {
    let next_cursor = if tables.len() >= page_size {
        Some((offset + tables.len() as u64).to_string())
    } else {
        None
    };

    ItemBatch {
        items: tables.iter().map(|t| t.to_item(snapshot)).collect(),
        next_cursor,
    }
}

/// Render rows as CSV with a header line. `None` cells are written empty.
pub(crate) fn write_csv<I>(columns: &[String], rows: I) -> Result<Vec<u8>, ConnectorError>
where
    I: IntoIterator<Item = Vec<Option<String>>>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(columns)
        .map_err(|e| ConnectorError::ExportFailed(e.to_string()))?;

    for row in rows {
        writer
            .write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))
            .map_err(|e| ConnectorError::ExportFailed(e.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| ConnectorError::ExportFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_key_format() {
        let snapshot = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let item = TableRef::new("public", "orders").to_item(snapshot);
        assert_eq!(item.key, "2024-03-15/public.orders.csv");
        assert_eq!(item.locator, "public.orders");
    }

    #[test]
    fn test_locator_round_trip_and_validation() {
        assert_eq!(
            TableRef::from_locator("public.orders").unwrap(),
            TableRef::new("public", "orders")
        );
        assert!(TableRef::from_locator("orders").is_err());
        assert!(TableRef::from_locator("public.orders\"; DROP TABLE x; --").is_err());
        assert!(TableRef::from_locator("public.1abc").is_err());
    }

    #[test]
    fn test_batch_cursor() {
        let snapshot = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let full = table_batch(
            vec![TableRef::new("s", "a"), TableRef::new("s", "b")],
            4,
            2,
            snapshot,
        );
        assert_eq!(full.next_cursor.as_deref(), Some("6"));

        let last = table_batch(vec![TableRef::new("s", "c")], 6, 2, snapshot);
        assert_eq!(last.next_cursor, None);

        assert_eq!(parse_cursor(Some("6".into())).unwrap(), 6);
        assert!(parse_cursor(Some("x".into())).is_err());
    }

    #[test]
    fn test_write_csv_quotes_and_nulls() {
        let columns = vec!["id".to_string(), "note".to_string()];
        let rows = vec![
            vec![Some("1".to_string()), Some("a,b".to_string())],
            vec![Some("2".to_string()), None],
        ];
        let bytes = write_csv(&columns, rows).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "id,note\n1,\"a,b\"\n2,\n");
    }
}
