//! Privileged database administration.
//!
//! [`DbAdmin`] holds a connection to a maintenance database (usually `postgres`)
//! and creates, copies and drops the throwaway databases handed out to tests.

use crate::error::PgTestError;
use crate::models::ConnectionConfig;
use crate::services::connection::{quote_ident, Session};

/// Administrative connection used to create and drop test databases.
#[derive(Debug)]
pub struct DbAdmin {
    session: Session,
}

impl DbAdmin {
    /// Create an unconnected admin for the maintenance database named by `config.database`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { session: Session::new(config) }
    }

    /// Create an admin and connect it.
    pub async fn connect_to(config: ConnectionConfig) -> Result<Self, PgTestError> {
        let admin = Self::new(config);
        admin.connect().await?;
        Ok(admin)
    }

    /// Open the administrative connection.
    pub async fn connect(&self) -> Result<(), PgTestError> {
        self.session.connect().await
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        self.session.config()
    }

    /// Create an empty database.
    pub async fn create_database(&self, name: &str) -> Result<(), PgTestError> {
        let sql = format!("CREATE DATABASE {}", quote_ident(name));
        self.run_create(name, &sql).await?;
        tracing::info!(database = %name, "Created database");
        Ok(())
    }

    /// Create a database as a copy of `template`.
    ///
    /// The template must have no other open sessions while it is copied.
    pub async fn create_database_from_template(
        &self,
        name: &str,
        template: &str,
    ) -> Result<(), PgTestError> {
        let sql = format!("CREATE DATABASE {} TEMPLATE {}", quote_ident(name), quote_ident(template));
        self.run_create(name, &sql).await?;
        tracing::info!(database = %name, template = %template, "Created database from template");
        Ok(())
    }

    async fn run_create(&self, name: &str, sql: &str) -> Result<(), PgTestError> {
        let client = self.session.client()?;
        client.batch_execute(sql).await.map_err(|e| {
            let err = PgTestError::database_create(name, e.into());
            tracing::error!(database = %name, error = %err, "CREATE DATABASE failed");
            err
        })
    }

    /// Terminate other sessions on `name`, then drop it.
    ///
    /// Fails if the database does not exist.
    pub async fn drop_database(&self, name: &str) -> Result<(), PgTestError> {
        self.drop_with(name, false).await
    }

    /// Like [`drop_database`](Self::drop_database), but a missing database is not an error.
    pub async fn drop_database_if_exists(&self, name: &str) -> Result<(), PgTestError> {
        self.drop_with(name, true).await
    }

    async fn drop_with(&self, name: &str, if_exists: bool) -> Result<(), PgTestError> {
        let client = self.session.client()?;

        let terminated = self
            .terminate_connections(name)
            .await
            .map_err(|e| PgTestError::database_drop(name, e))?;
        if terminated > 0 {
            tracing::debug!(database = %name, terminated, "Terminated lingering sessions");
        }

        let sql = if if_exists {
            format!("DROP DATABASE IF EXISTS {}", quote_ident(name))
        } else {
            format!("DROP DATABASE {}", quote_ident(name))
        };
        client.batch_execute(&sql).await.map_err(|e| {
            let err = PgTestError::database_drop(name, e.into());
            tracing::error!(database = %name, error = %err, "DROP DATABASE failed");
            err
        })?;

        tracing::info!(database = %name, "Dropped database");
        Ok(())
    }

    /// Terminate every other backend connected to `name`.
    ///
    /// Returns the number of sessions that were signalled.
    pub async fn terminate_connections(&self, name: &str) -> Result<u64, PgTestError> {
        let client = self.session.client()?;
        let terminated = client
            .execute(
                r#"
                SELECT pg_terminate_backend(pid)
                FROM pg_catalog.pg_stat_activity
                WHERE datname = $1
                  AND pid <> pg_backend_pid()
                "#,
                &[&name],
            )
            .await?;
        Ok(terminated)
    }

    /// Check the catalog for a database.
    pub async fn database_exists(&self, name: &str) -> Result<bool, PgTestError> {
        let client = self.session.client()?;
        let row = client
            .query_opt("SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1", &[&name])
            .await?;
        Ok(row.is_some())
    }

    /// Install extensions into `database`, in order.
    ///
    /// Uses `CREATE EXTENSION IF NOT EXISTS`, so already installed ones are skipped.
    /// Stops at the first extension that fails.
    pub async fn install_extensions<S: AsRef<str>>(
        &self,
        extensions: &[S],
        database: &str,
    ) -> Result<(), PgTestError> {
        if extensions.is_empty() {
            return Ok(());
        }

        // Extensions live per database, so this needs a session on the target.
        let session = Session::new(self.config().with_database(database));
        session.connect().await?;

        let result = async {
            let client = session.client()?;
            for extension in extensions {
                let extension = extension.as_ref();
                let sql = format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(extension));
                client.batch_execute(&sql).await.map_err(|e| {
                    let err = PgTestError::extension(extension, database, PgTestError::from(e).to_string());
                    tracing::error!(error = %err, "Extension install failed");
                    err
                })?;
                tracing::debug!(database = %database, extension = %extension, "Installed extension");
            }
            Ok(())
        }
        .await;

        session.close().await;
        result
    }

    /// Release the administrative connection.
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Check if the admin connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}
