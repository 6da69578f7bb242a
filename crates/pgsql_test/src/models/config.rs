//! Connection configuration models.

use serde::{Deserialize, Serialize};

/// Default host when `PGHOST` is unset.
pub const DEFAULT_HOST: &str = "localhost";
/// Default port when `PGPORT` is unset.
pub const DEFAULT_PORT: u16 = 5432;
/// Default maintenance database when `PGDATABASE` is unset.
pub const DEFAULT_DATABASE: &str = "postgres";
/// Default user when `PGUSER` is unset.
pub const DEFAULT_USER: &str = "postgres";

/// Additional connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Connection timeout in seconds
    pub connect_timeout_secs: u32,
    /// Application name sent to PostgreSQL
    pub application_name: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self { connect_timeout_secs: 10, application_name: "pgsql-test".to_string() }
    }
}

/// Configuration for a database connection.
///
/// The password is never serialized and never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server hostname or IP
    pub host: String,
    /// Server port
    pub port: u16,
    /// Database name (1-63 bytes)
    pub database: String,
    /// Login user
    pub user: String,
    /// Login password
    #[serde(skip_serializing)]
    pub password: String,
    /// Additional options
    pub options: ConnectionOptions,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            options: ConnectionOptions::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with required fields.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            options: ConnectionOptions::default(),
        }
    }

    /// Read the standard libpq variables (`PGHOST`, `PGPORT`, `PGDATABASE`,
    /// `PGUSER`, `PGPASSWORD`), falling back to the defaults for unset ones.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    ///
    /// An unparsable `PGPORT` falls back to the default port.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let port = match non_empty("PGPORT") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "Ignoring invalid PGPORT");
                defaults.port
            }),
            None => defaults.port,
        };

        Self {
            host: non_empty("PGHOST").unwrap_or(defaults.host),
            port,
            database: non_empty("PGDATABASE").unwrap_or(defaults.database),
            user: non_empty("PGUSER").unwrap_or(defaults.user),
            password: lookup("PGPASSWORD").unwrap_or_default(),
            options: defaults.options,
        }
    }

    /// Return a copy pointed at another database.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self { database: database.into(), ..self.clone() }
    }

    /// Return a copy that logs in with other credentials.
    pub fn with_credentials(&self, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self { user: user.into(), password: password.into(), ..self.clone() }
    }

    /// Set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.options.application_name = name.into();
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout_secs(mut self, secs: u32) -> Self {
        self.options.connect_timeout_secs = secs;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Host is required".to_string());
        }
        if self.port == 0 {
            return Err("Port must be non-zero".to_string());
        }
        if self.database.is_empty() || self.database.len() > 63 {
            return Err("Database name must be 1-63 bytes".to_string());
        }
        if self.user.is_empty() {
            return Err("User is required".to_string());
        }
        Ok(())
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        format!("postgresql://{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }

    /// Environment variables that point libpq-based tools at this database.
    pub fn libpq_env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PGHOST", self.host.clone()),
            ("PGPORT", self.port.to_string()),
            ("PGDATABASE", self.database.clone()),
            ("PGUSER", self.user.clone()),
            ("PGPASSWORD", self.password.clone()),
        ]
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_uses_defaults_for_unset_values() {
        let config = ConnectionConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ConnectionConfig::default());
        assert_eq!(config.display_url(), "postgresql://postgres@localhost:5432/postgres");
    }

    #[test]
    fn test_from_lookup_reads_libpq_variables() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            ("PGHOST", "db.internal"),
            ("PGPORT", "6543"),
            ("PGDATABASE", "maint"),
            ("PGUSER", "admin"),
            ("PGPASSWORD", "s3cret"),
        ]));
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.database, "maint");
        assert_eq!(config.user, "admin");
        assert_eq!(config.password, "s3cret");
    }

    #[test]
    fn test_from_lookup_ignores_bad_port() {
        let config = ConnectionConfig::from_lookup(lookup(&[("PGPORT", "not-a-port")]));
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_with_database_leaves_original_untouched() {
        let base = ConnectionConfig::new("localhost", 5432, "postgres", "postgres", "pw");
        let test_db = base.with_database("pgsql_test_1");
        assert_eq!(base.database, "postgres");
        assert_eq!(test_db.database, "pgsql_test_1");
        assert_eq!(test_db.password, "pw");
    }

    #[test]
    fn test_debug_and_serialize_hide_password() {
        let config = ConnectionConfig::new("localhost", 5432, "postgres", "postgres", "hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"host": "pg", "password": "pw"}"#).unwrap();
        assert_eq!(config.host, "pg");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.password, "pw");
        assert_eq!(config.options.application_name, "pgsql-test");
    }

    #[test]
    fn test_validate() {
        let mut config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        config.database = "x".repeat(64);
        assert!(config.validate().is_err());
        config.database = "ok".to_string();
        config.user.clear();
        assert!(config.validate().is_err());
    }
}
