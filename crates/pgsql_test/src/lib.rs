//! Isolated PostgreSQL databases for tests.
//!
//! Each test suite gets its own freshly created, seeded database and two clients
//! bound to it. Per-test isolation comes from savepoints: everything a test
//! writes between `before_each()` and `after_each()` is rolled back.
//!
//! - **error**: Error handling with PostgreSQL-specific details
//! - **models**: Connection configuration and query results
//! - **services**: Admin connection and the test client
//! - **seed**: Strategies for populating a new database
//! - **manager**: Database lifecycle and the `get_connections` entry point
//! - **logging**: Structured logging setup
//!
//! ```no_run
//! use pgsql_test::{get_connections, seed};
//!
//! # async fn example() -> Result<(), pgsql_test::PgTestError> {
//! let conn = get_connections(None, vec![seed::sqlfile(["tests/sql/schema.sql"])]).await?;
//!
//! conn.db().before_each().await?;
//! conn.db().execute("INSERT INTO users (name) VALUES ($1)", &[&"Alice"]).await?;
//! let row = conn.db().one("SELECT count(*) AS n FROM users", &[]).await?;
//! assert_eq!(row.get::<i64>("n")?, 1);
//! conn.db().after_each().await?;
//!
//! conn.teardown().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod logging;
pub mod manager;
pub mod models;
pub mod seed;
pub mod services;

#[cfg(test)]
mod verification_tests;

pub use error::PgTestError;
pub use manager::{
    generate_test_db_name, get_connections, ConnectionManager, Connections, TestDbOptions,
    DEFAULT_PREFIX,
};
pub use models::{ColumnInfo, ConnectionConfig, ConnectionOptions, QueryResult, QueryType, Row};
pub use seed::{SeedAdapter, SeedContext};
pub use services::{DbAdmin, PgTestClient, SqlParam};
