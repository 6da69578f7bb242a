//! Query result models.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PgTestError;
use crate::models::decode::decode_column;

/// Type of SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    /// SELECT query returning rows
    Select,
    /// INSERT operation
    Insert,
    /// UPDATE operation
    Update,
    /// DELETE operation
    Delete,
    /// DDL, COPY, or other operations
    Other,
}

impl QueryType {
    /// Detect the type of a SQL statement from its leading keyword.
    pub fn detect(sql: &str) -> Self {
        let trimmed = sql.trim_start().to_uppercase();

        if trimmed.starts_with("SELECT") || trimmed.starts_with("WITH") {
            Self::Select
        } else if trimmed.starts_with("INSERT") {
            Self::Insert
        } else if trimmed.starts_with("UPDATE") {
            Self::Update
        } else if trimmed.starts_with("DELETE") {
            Self::Delete
        } else {
            Self::Other
        }
    }
}

/// Column metadata from query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// PostgreSQL type OID
    pub type_oid: u32,
    /// Human-readable type name
    pub type_name: String,
}

/// One result row: column name to value, in server column order.
///
/// When a result has several columns with the same name, the last one wins:
/// the entry keeps the position of the first occurrence and the value of the last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    /// Build a row from name/value pairs.
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        let mut map = Map::new();
        for (name, value) in pairs {
            map.insert(name.into(), value);
        }
        Self(map)
    }

    /// Convert a driver row, decoding every column.
    ///
    /// Fails with [`PgTestError::Decode`] on a column type with no JSON mapping.
    pub fn from_pg(row: &tokio_postgres::Row) -> Result<Self, PgTestError> {
        let mut map = Map::new();
        for (idx, col) in row.columns().iter().enumerate() {
            map.insert(col.name().to_string(), decode_column(row, idx)?);
        }
        Ok(Self(map))
    }

    /// Raw JSON value for a column.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Deserialize a column into `T`.
    ///
    /// `Option<T>` reads SQL NULL as `None`.
    pub fn get<T: DeserializeOwned>(&self, column: &str) -> Result<T, PgTestError> {
        let value = self
            .0
            .get(column)
            .ok_or_else(|| PgTestError::decode(column, "no such column"))?;
        serde_json::from_value(value.clone())
            .map_err(|e| PgTestError::decode(column, e.to_string()))
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of distinct columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over name/value pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Consume the row into its underlying map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

static NULL: Value = Value::Null;

impl std::ops::Index<&str> for Row {
    type Output = Value;

    /// Returns `Value::Null` for unknown columns, like `serde_json::Value` indexing.
    fn index(&self, column: &str) -> &Value {
        self.0.get(column).unwrap_or(&NULL)
    }
}

/// Results from query execution.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Result rows in server order
    pub rows: Vec<Row>,
    /// Rows affected as reported by the server, else the number of rows returned
    pub row_count: u64,
    /// Column metadata
    pub columns: Vec<ColumnInfo>,
    /// Time to execute in milliseconds
    pub execution_time_ms: u64,
    /// Type of statement
    pub query_type: QueryType,
}

impl QueryResult {
    /// Get the number of rows returned.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
