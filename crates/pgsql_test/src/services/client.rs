//! Test client with per-test transaction isolation.
//!
//! [`PgTestClient`] is bound to one database over one connection. Besides the
//! query helpers it runs the isolation protocol used between test cases:
//!
//! ```text
//!   Idle --before_each()--> SavepointActive --after_each()--> Idle
//! ```
//!
//! `before_each()` opens a transaction when none is open and sets a savepoint.
//! `after_each()` rolls back to that savepoint and releases it, leaving the
//! transaction open so the next test starts from the same baseline.

use crate::error::PgTestError;
use crate::models::{ColumnInfo, ConnectionConfig, QueryResult, QueryType, Row};
use crate::services::connection::{quote_ident, Session};

use futures_util::StreamExt;
use parking_lot::Mutex;
use std::pin::pin;
use std::time::Instant;
use tokio_postgres::types::ToSql;

/// Savepoint name used by `before_each()`/`after_each()`.
const EACH_SAVEPOINT: &str = "pgsql_test_each";

/// A bind parameter, as accepted by the query methods.
///
/// Parameters may borrow from the caller, e.g. `&name.as_str()`.
pub type SqlParam<'a> = dyn ToSql + Sync + 'a;

/// Transaction bookkeeping for the connection.
///
/// Never held across an await point.
#[derive(Debug, Default, Clone, Copy)]
struct TxnState {
    in_transaction: bool,
    savepoint_active: bool,
}

/// Client bound to a single test database.
#[derive(Debug)]
pub struct PgTestClient {
    session: Session,
    txn: Mutex<TxnState>,
}

impl PgTestClient {
    /// Create an unconnected client. Call [`connect`](Self::connect) before querying.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { session: Session::new(config), txn: Mutex::new(TxnState::default()) }
    }

    /// Create a client and connect it.
    pub async fn connect_to(config: ConnectionConfig) -> Result<Self, PgTestError> {
        let client = Self::new(config);
        client.connect().await?;
        Ok(client)
    }

    /// Open the connection.
    pub async fn connect(&self) -> Result<(), PgTestError> {
        self.session.connect().await
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        self.session.config()
    }

    /// Name of the database this client is bound to.
    pub fn database(&self) -> &str {
        &self.session.config().database
    }

    /// Check if the client holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Check if a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.txn.lock().in_transaction
    }

    /// Check if a `before_each()` savepoint is waiting for its `after_each()`.
    pub fn has_active_savepoint(&self) -> bool {
        self.txn.lock().savepoint_active
    }

    // ========== Queries ==========

    /// Run a statement and collect its rows.
    ///
    /// Parameters bind to `$1`, `$2`, ... placeholders.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<QueryResult, PgTestError> {
        let client = self.session.client()?;
        let start = Instant::now();
        let query_type = QueryType::detect(sql);

        tracing::debug!(database = %self.database(), query_type = ?query_type, "Executing query");

        let statement = client.prepare(sql).await.map_err(|e| self.failed(e))?;
        let columns: Vec<ColumnInfo> = statement
            .columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                type_oid: col.type_().oid(),
                type_name: col.type_().name().to_string(),
            })
            .collect();

        let stream = client
            .query_raw(&statement, params.iter().map(|p| *p as &dyn ToSql))
            .await
            .map_err(|e| self.failed(e))?;
        let mut stream = pin!(stream);

        let mut rows = Vec::new();
        while let Some(row) = stream.next().await {
            let row = row.map_err(|e| self.failed(e))?;
            rows.push(Row::from_pg(&row)?);
        }
        let row_count = stream.rows_affected().unwrap_or(rows.len() as u64);

        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            database = %self.database(),
            execution_time_ms,
            row_count,
            "Query completed"
        );

        Ok(QueryResult { rows, row_count, columns, execution_time_ms, query_type })
    }

    /// Run a statement and return the number of affected rows (0 for DDL).
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, PgTestError> {
        let client = self.session.client()?;
        tracing::debug!(database = %self.database(), "Executing statement");
        client.execute(sql, params).await.map_err(|e| self.failed(e))
    }

    /// Run one or more `;`-separated statements without parameters.
    pub async fn batch_execute(&self, sql: &str) -> Result<(), PgTestError> {
        let client = self.session.client()?;
        tracing::debug!(database = %self.database(), bytes = sql.len(), "Executing batch");
        client.batch_execute(sql).await.map_err(|e| self.failed(e))
    }

    /// Return the only row of the result.
    ///
    /// Fails with [`PgTestError::NoRows`] on an empty result and with
    /// [`PgTestError::MultipleRows`] when more than one row comes back.
    pub async fn one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row, PgTestError> {
        self.one_or_none(sql, params).await?.ok_or(PgTestError::NoRows)
    }

    /// Like [`one`](Self::one), but an empty result is `None`.
    pub async fn one_or_none(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, PgTestError> {
        let mut rows = self.query(sql, params).await?.rows;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            count => Err(PgTestError::MultipleRows { count }),
        }
    }

    /// Return every row, in result order.
    pub async fn many(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, PgTestError> {
        Ok(self.query(sql, params).await?.rows)
    }

    /// Set session variables such as `app.user_id` or `role`.
    ///
    /// Inside a transaction the values last until it ends; outside one they last
    /// for the session. Names and values are bound as parameters of `set_config`.
    pub async fn set_context<K, V>(
        &self,
        settings: impl IntoIterator<Item = (K, V)>,
    ) -> Result<(), PgTestError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let client = self.session.client()?;
        let is_local = self.in_transaction();

        for (name, value) in settings {
            let (name, value) = (name.as_ref(), value.as_ref());
            client
                .execute("SELECT set_config($1, $2, $3)", &[&name, &value, &is_local])
                .await
                .map_err(|e| self.failed(e))?;
            tracing::debug!(database = %self.database(), setting = %name, is_local, "Context set");
        }

        Ok(())
    }

    // ========== Transactions ==========

    /// Open a transaction. Does nothing if one is already open.
    pub async fn begin(&self) -> Result<(), PgTestError> {
        if self.in_transaction() {
            tracing::debug!(database = %self.database(), "Transaction already open");
            return Ok(());
        }
        self.batch_execute("BEGIN").await?;
        self.txn.lock().in_transaction = true;
        Ok(())
    }

    /// Commit the open transaction.
    pub async fn commit(&self) -> Result<(), PgTestError> {
        self.batch_execute("COMMIT").await?;
        *self.txn.lock() = TxnState::default();
        Ok(())
    }

    /// Roll back the open transaction.
    pub async fn rollback(&self) -> Result<(), PgTestError> {
        self.batch_execute("ROLLBACK").await?;
        *self.txn.lock() = TxnState::default();
        Ok(())
    }

    /// Set a named savepoint inside the open transaction.
    pub async fn savepoint(&self, name: &str) -> Result<(), PgTestError> {
        self.require_transaction("savepoint()")?;
        self.batch_execute(&format!("SAVEPOINT {}", quote_ident(name))).await
    }

    /// Roll back to a named savepoint, keeping it.
    pub async fn rollback_to_savepoint(&self, name: &str) -> Result<(), PgTestError> {
        self.require_transaction("rollback_to_savepoint()")?;
        self.batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name))).await
    }

    /// Release a named savepoint.
    pub async fn release_savepoint(&self, name: &str) -> Result<(), PgTestError> {
        self.require_transaction("release_savepoint()")?;
        self.batch_execute(&format!("RELEASE SAVEPOINT {}", quote_ident(name))).await
    }

    fn require_transaction(&self, op: &str) -> Result<(), PgTestError> {
        if self.in_transaction() {
            Ok(())
        } else {
            Err(PgTestError::isolation(format!("{op} requires an open transaction; call begin() first")))
        }
    }

    // ========== Per-test isolation ==========

    /// Mark the baseline for the next test.
    pub async fn before_each(&self) -> Result<(), PgTestError> {
        if self.has_active_savepoint() {
            return Err(PgTestError::isolation(
                "before_each() called while a savepoint is active; call after_each() first",
            ));
        }

        self.begin().await?;
        self.batch_execute(&format!("SAVEPOINT {EACH_SAVEPOINT}")).await?;
        self.txn.lock().savepoint_active = true;

        tracing::debug!(database = %self.database(), "Savepoint set");
        Ok(())
    }

    /// Discard everything since the matching `before_each()`.
    pub async fn after_each(&self) -> Result<(), PgTestError> {
        if !self.has_active_savepoint() {
            return Err(PgTestError::isolation(
                "after_each() called without a matching before_each()",
            ));
        }

        self.batch_execute(&format!(
            "ROLLBACK TO SAVEPOINT {EACH_SAVEPOINT}; RELEASE SAVEPOINT {EACH_SAVEPOINT}"
        ))
        .await?;
        self.txn.lock().savepoint_active = false;

        tracing::debug!(database = %self.database(), "Rolled back to savepoint");
        Ok(())
    }

    /// Close the connection. Further queries fail with `ClosedConnection`.
    pub async fn close(&self) {
        self.session.close().await;
        *self.txn.lock() = TxnState::default();
    }

    fn failed(&self, e: tokio_postgres::Error) -> PgTestError {
        let err = PgTestError::from(e);
        tracing::warn!(database = %self.database(), error = %err, "Statement failed");
        err
    }
}
