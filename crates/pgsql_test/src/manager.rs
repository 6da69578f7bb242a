//! Test database lifecycle.
//!
//! [`ConnectionManager::open`] creates a uniquely named database, installs
//! extensions, runs the seed adapters and hands back a [`Connections`] bundle.
//! [`Connections::teardown`] closes everything and drops the database.
//!
//! A failed setup never leaves a database behind: whatever was opened is closed
//! and the database is dropped before the error is returned.

use crate::error::PgTestError;
use crate::models::ConnectionConfig;
use crate::seed::{SeedAdapter, SeedContext};
use crate::services::{DbAdmin, PgTestClient};

use uuid::Uuid;

/// Default prefix for generated database names.
pub const DEFAULT_PREFIX: &str = "pgsql_test_";

/// PostgreSQL truncates identifiers longer than this.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Generate a database name: `prefix` as given followed by a random UUID in lower-case hex.
///
/// A prefix too long for a PostgreSQL identifier is shortened so the whole
/// name fits in 63 bytes.
pub fn generate_test_db_name(prefix: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let mut end = prefix.len().min(MAX_IDENTIFIER_LEN - token.len());
    while !prefix.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{token}", &prefix[..end])
}

/// Options for creating a test database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDbOptions {
    /// Prefix for the generated database name.
    pub prefix: String,
    /// Extensions installed before seeding, in order.
    pub extensions: Vec<String>,
    /// Copy this database instead of creating an empty one.
    pub template: Option<String>,
    /// Credentials for the application client; defaults to the admin credentials.
    pub app_user: Option<(String, String)>,
}

impl Default for TestDbOptions {
    fn default() -> Self {
        Self { prefix: DEFAULT_PREFIX.to_string(), extensions: Vec::new(), template: None, app_user: None }
    }
}

impl TestDbOptions {
    /// Set the name prefix. It is used verbatim, case included.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Add extensions to install.
    pub fn with_extensions<S: Into<String>>(mut self, extensions: impl IntoIterator<Item = S>) -> Self {
        self.extensions.extend(extensions.into_iter().map(Into::into));
        self
    }

    /// Create the database from a template.
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Connect the application client as another role.
    pub fn with_app_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.app_user = Some((user.into(), password.into()));
        self
    }
}

/// Creates seeded test databases.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    options: TestDbOptions,
}

impl ConnectionManager {
    /// `config.database` is the maintenance database the admin connects to.
    pub fn new(config: ConnectionConfig, options: TestDbOptions) -> Self {
        Self { config, options }
    }

    /// Get the admin configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get the database options.
    pub fn options(&self) -> &TestDbOptions {
        &self.options
    }

    /// Create, prepare and seed a fresh database.
    pub async fn open(&self, seed_adapters: Vec<SeedAdapter>) -> Result<Connections, PgTestError> {
        let database = generate_test_db_name(&self.options.prefix);
        tracing::info!(database = %database, adapters = seed_adapters.len(), "Opening test database");

        let admin = DbAdmin::connect_to(self.config.clone()).await?;

        let created = match &self.options.template {
            Some(template) => admin.create_database_from_template(&database, template).await,
            None => admin.create_database(&database).await,
        };
        if let Err(e) = created {
            admin.close().await;
            return Err(e);
        }

        let config = self.config.with_database(&database);
        let app_config = match &self.options.app_user {
            Some((user, password)) => config.with_credentials(user, password),
            None => config.clone(),
        };
        let pg = PgTestClient::new(config.clone());
        let db = PgTestClient::new(app_config);

        let setup = async {
            admin.install_extensions(&self.options.extensions, &database).await?;
            pg.connect().await?;

            let ctx = SeedContext { config: &config, admin: &admin, pg: &pg };
            for adapter in &seed_adapters {
                adapter.seed(&ctx).await.map_err(|e| PgTestError::seed(adapter.kind(), e))?;
            }

            // After seeding, so a seed may create the application role.
            db.connect().await
        }
        .await;

        if let Err(e) = setup {
            tracing::error!(database = %database, error = %e, "Test database setup failed, cleaning up");
            db.close().await;
            pg.close().await;
            let mut cleanup = Vec::new();
            if let Err(drop_err) = admin.drop_database_if_exists(&database).await {
                cleanup.push(drop_err);
            }
            admin.close().await;
            return Err(PgTestError::setup_failed(e, cleanup));
        }

        tracing::info!(database = %database, "Test database ready");
        Ok(Connections { admin, pg, db, config, torn_down: false })
    }
}

/// Create a seeded test database with default options.
///
/// Reads the connection from `PG*` environment variables when `config` is `None`.
pub async fn get_connections(
    config: Option<ConnectionConfig>,
    seed_adapters: Vec<SeedAdapter>,
) -> Result<Connections, PgTestError> {
    let config = config.unwrap_or_else(ConnectionConfig::from_env);
    ConnectionManager::new(config, TestDbOptions::default()).open(seed_adapters).await
}

/// Everything a test suite needs for one database.
///
/// Call [`teardown`](Self::teardown) when done; dropping the bundle without it
/// leaves the database on the server.
#[derive(Debug)]
pub struct Connections {
    admin: DbAdmin,
    pg: PgTestClient,
    db: PgTestClient,
    config: ConnectionConfig,
    torn_down: bool,
}

impl Connections {
    /// Administrative connection to the maintenance database.
    pub fn admin(&self) -> &DbAdmin {
        &self.admin
    }

    /// Privileged client on the test database.
    pub fn pg(&self) -> &PgTestClient {
        &self.pg
    }

    /// Application client on the test database.
    pub fn db(&self) -> &PgTestClient {
        &self.db
    }

    /// Name of the test database.
    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// Configuration of the test database, with admin credentials.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Close both clients, drop the database and close the admin connection.
    ///
    /// Every step runs even if an earlier one fails; the first failure is returned.
    pub async fn teardown(mut self) -> Result<(), PgTestError> {
        self.torn_down = true;
        let database = self.config.database.clone();

        self.db.close().await;
        self.pg.close().await;
        let dropped = self.admin.drop_database(&database).await;
        self.admin.close().await;

        match &dropped {
            Ok(()) => tracing::info!(database = %database, "Test database torn down"),
            Err(e) => tracing::error!(database = %database, error = %e, "Teardown failed"),
        }
        dropped
    }
}

impl Drop for Connections {
    fn drop(&mut self) {
        if !self.torn_down {
            tracing::warn!(
                database = %self.config.database,
                "Connections dropped without teardown(), database left on server"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_names_are_unique() {
        let names: HashSet<_> = (0..100).map(|_| generate_test_db_name("t_")).collect();
        assert_eq!(names.len(), 100);
    }

    #[test]
    fn test_generated_name_shape() {
        let name = generate_test_db_name(DEFAULT_PREFIX);
        assert!(name.starts_with("pgsql_test_"));
        assert_eq!(name.len(), DEFAULT_PREFIX.len() + 32);
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn test_generated_name_keeps_prefix_and_is_bounded() {
        let name = generate_test_db_name("MyApp_");
        assert!(name.starts_with("MyApp_"));
        assert!(name["MyApp_".len()..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));

        let name = generate_test_db_name(&"é".repeat(40));
        assert!(name.len() <= 63);
        assert!(name.starts_with("éé"));

        let name = generate_test_db_name(&"x".repeat(80));
        assert_eq!(name.len(), 63);
        assert!(name.starts_with("xxxx"));
    }

    #[test]
    fn test_options_builders() {
        let options = TestDbOptions::default()
            .with_prefix("app_")
            .with_extensions(["uuid-ossp", "citext"])
            .with_template("app_template")
            .with_app_user("app_user", "secret");

        assert_eq!(options.prefix, "app_");
        assert_eq!(options.extensions, vec!["uuid-ossp", "citext"]);
        assert_eq!(options.template.as_deref(), Some("app_template"));
        assert_eq!(options.app_user, Some(("app_user".to_string(), "secret".to_string())));
        assert_eq!(TestDbOptions::default().prefix, DEFAULT_PREFIX);
    }
}
