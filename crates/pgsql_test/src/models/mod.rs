//! Data models for pgsql-test.
//!
//! - `config` - ConnectionConfig, ConnectionOptions
//! - `query` - QueryResult, Row, QueryType, ColumnInfo
//! - `decode` - PostgreSQL column values to JSON

pub mod config;
mod decode;
pub mod query;

pub use config::{ConnectionConfig, ConnectionOptions};
pub use query::{ColumnInfo, QueryResult, QueryType, Row};
