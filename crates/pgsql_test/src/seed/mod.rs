//! Seed adapters that populate a fresh test database.
//!
//! Adapters run in order against one shared [`SeedContext`]:
//!
//! - [`sqlfile`] - execute SQL files through the privileged client
//! - [`func`] - run an async closure
//! - [`compose`] - run several adapters in sequence
//! - [`pgpm`] / [`external_migration`] - run a migration tool as a subprocess
//!
//! ```no_run
//! use pgsql_test::{get_connections, seed};
//!
//! # async fn example() -> Result<(), pgsql_test::PgTestError> {
//! let conn = get_connections(None, vec![
//!     seed::sqlfile(["tests/sql/schema.sql"]),
//!     seed::func(|ctx| Box::pin(async move {
//!         ctx.pg.execute("INSERT INTO users (name) VALUES ($1)", &[&"Alice"]).await?;
//!         Ok(())
//!     })),
//! ])
//! .await?;
//! conn.teardown().await?;
//! # Ok(())
//! # }
//! ```

mod external;
mod sql;

pub use external::ExternalMigration;
pub use sql::SqlFileSeed;

use crate::error::PgTestError;
use crate::models::ConnectionConfig;
use crate::services::{DbAdmin, PgTestClient};

use futures_util::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;

/// Future returned by seed adapters.
pub type SeedFuture<'a> = BoxFuture<'a, Result<(), PgTestError>>;

type SeedFn = dyn for<'a> Fn(&'a SeedContext<'a>) -> SeedFuture<'a> + Send + Sync;

/// Handles passed to every adapter in a seed chain.
#[derive(Debug, Clone, Copy)]
pub struct SeedContext<'a> {
    /// Configuration of the database being seeded.
    pub config: &'a ConnectionConfig,
    /// Administrative connection to the maintenance database.
    pub admin: &'a DbAdmin,
    /// Privileged client connected to the database being seeded.
    pub pg: &'a PgTestClient,
}

/// A strategy for populating a database.
#[derive(Clone)]
pub enum SeedAdapter {
    /// Execute SQL files in order.
    SqlFile(SqlFileSeed),
    /// Run a custom async function.
    Fn(Arc<SeedFn>),
    /// Run adapters in order, stopping at the first failure.
    Compose(Vec<SeedAdapter>),
    /// Run an external migration tool.
    ExternalMigration(ExternalMigration),
}

impl SeedAdapter {
    /// Short name of the adapter kind, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SqlFile(_) => "sqlfile",
            Self::Fn(_) => "fn",
            Self::Compose(_) => "compose",
            Self::ExternalMigration(_) => "external_migration",
        }
    }

    /// Populate the database behind `ctx`.
    pub fn seed<'a>(&'a self, ctx: &'a SeedContext<'a>) -> SeedFuture<'a> {
        Box::pin(async move {
            tracing::debug!(adapter = self.kind(), database = %ctx.config.database, "Seeding");
            match self {
                Self::SqlFile(files) => files.seed(ctx).await,
                Self::Fn(f) => (f.as_ref())(ctx).await,
                Self::Compose(adapters) => {
                    for adapter in adapters {
                        adapter.seed(ctx).await?;
                    }
                    Ok(())
                }
                Self::ExternalMigration(migration) => migration.seed(ctx).await,
            }
        })
    }
}

impl std::fmt::Debug for SeedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlFile(files) => f.debug_tuple("SqlFile").field(files).finish(),
            Self::Fn(_) => f.write_str("Fn(..)"),
            Self::Compose(adapters) => f.debug_tuple("Compose").field(adapters).finish(),
            Self::ExternalMigration(m) => f.debug_tuple("ExternalMigration").field(m).finish(),
        }
    }
}

impl From<SqlFileSeed> for SeedAdapter {
    fn from(files: SqlFileSeed) -> Self {
        Self::SqlFile(files)
    }
}

impl From<ExternalMigration> for SeedAdapter {
    fn from(migration: ExternalMigration) -> Self {
        Self::ExternalMigration(migration)
    }
}

/// Execute each SQL file, in order, through the privileged client.
pub fn sqlfile<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> SeedAdapter {
    SeedAdapter::SqlFile(SqlFileSeed::new(paths))
}

/// Run a custom async function with the seed context.
pub fn func<F>(f: F) -> SeedAdapter
where
    F: for<'a> Fn(&'a SeedContext<'a>) -> SeedFuture<'a> + Send + Sync + 'static,
{
    SeedAdapter::Fn(Arc::new(f))
}

/// Run adapters one after another against the same context.
pub fn compose(adapters: impl IntoIterator<Item = SeedAdapter>) -> SeedAdapter {
    SeedAdapter::Compose(adapters.into_iter().collect())
}

/// Deploy a pgpm module: `pgpm deploy` run inside `module_path` for `package`.
pub fn pgpm(module_path: impl Into<PathBuf>, package: impl Into<String>) -> SeedAdapter {
    SeedAdapter::ExternalMigration(ExternalMigration::pgpm(module_path, package))
}

/// Run an arbitrary migration command.
pub fn external_migration(migration: ExternalMigration) -> SeedAdapter {
    SeedAdapter::ExternalMigration(migration)
}

/// Unconnected handles for exercising adapters without a server.
#[cfg(test)]
pub(crate) struct TestParts {
    pub config: ConnectionConfig,
    pub admin: DbAdmin,
    pub pg: PgTestClient,
}

#[cfg(test)]
impl TestParts {
    pub fn new() -> Self {
        let config = ConnectionConfig::default().with_database("pgsql_test_unit");
        Self {
            admin: DbAdmin::new(ConnectionConfig::default()),
            pg: PgTestClient::new(config.clone()),
            config,
        }
    }

    pub fn ctx(&self) -> SeedContext<'_> {
        SeedContext { config: &self.config, admin: &self.admin, pg: &self.pg }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> SeedAdapter {
        let log = log.clone();
        func(move |_ctx| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().push(name);
                Ok(())
            })
        })
    }

    fn failing(name: &'static str) -> SeedAdapter {
        func(move |_ctx| Box::pin(async move { Err::<(), _>(PgTestError::internal(name)) }))
    }

    #[tokio::test]
    async fn test_compose_runs_in_order() {
        let parts = TestParts::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let adapter = compose([recorder(&log, "A"), recorder(&log, "B"), recorder(&log, "C")]);
        adapter.seed(&parts.ctx()).await.unwrap();

        assert_eq!(*log.lock(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_compose_stops_at_first_failure() {
        let parts = TestParts::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let adapter = compose([recorder(&log, "A"), failing("B broke"), recorder(&log, "C")]);
        let err = adapter.seed(&parts.ctx()).await.unwrap_err();

        assert_eq!(err.to_string(), "Internal error: B broke");
        assert_eq!(*log.lock(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_nested_compose_keeps_order() {
        let parts = TestParts::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let adapter = compose([
            recorder(&log, "A"),
            compose([recorder(&log, "B1"), recorder(&log, "B2")]),
            recorder(&log, "C"),
        ]);
        adapter.seed(&parts.ctx()).await.unwrap();

        assert_eq!(*log.lock(), vec!["A", "B1", "B2", "C"]);
    }

    #[tokio::test]
    async fn test_fn_receives_the_context() {
        let parts = TestParts::new();
        let seen = Arc::new(Mutex::new(String::new()));

        let sink = seen.clone();
        let adapter = func(move |ctx| {
            let sink = sink.clone();
            Box::pin(async move {
                *sink.lock() = format!("{}:{}", ctx.config.database, ctx.pg.database());
                Ok(())
            })
        });
        adapter.seed(&parts.ctx()).await.unwrap();

        assert_eq!(*seen.lock(), "pgsql_test_unit:pgsql_test_unit");
    }

    #[test]
    fn test_kinds() {
        assert_eq!(sqlfile(["a.sql"]).kind(), "sqlfile");
        assert_eq!(compose([]).kind(), "compose");
        assert_eq!(pgpm("/tmp/module", "module").kind(), "external_migration");
        assert_eq!(failing("x").kind(), "fn");
        assert_eq!(format!("{:?}", failing("x")), "Fn(..)");
    }
}
