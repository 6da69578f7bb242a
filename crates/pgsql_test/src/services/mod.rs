//! Database services for pgsql-test.
//!
//! - `connection` - One exclusively owned tokio-postgres connection per session
//! - `admin` - Create, copy and drop databases; install extensions
//! - `client` - Query helpers and per-test savepoint isolation

pub mod admin;
pub mod client;
pub mod connection;

pub use admin::DbAdmin;
pub use client::{PgTestClient, SqlParam};
pub use connection::{quote_ident, Session};
