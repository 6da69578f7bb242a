//! Error types for pgsql-test.
//!
//! Every fallible operation in the crate returns [`PgTestError`]. Server errors are
//! mapped from `tokio_postgres::Error` with their SQLSTATE details preserved.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for test database provisioning and querying.
#[derive(Debug, Error)]
pub enum PgTestError {
    /// Database connection failed or was lost.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication failed.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// Statement execution error with PostgreSQL-specific details.
    #[error("{message}")]
    Query {
        /// PostgreSQL error message.
        message: String,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// PostgreSQL hint.
        hint: Option<String>,
        /// Position in query (1-indexed).
        position: Option<usize>,
        /// PostgreSQL error code (e.g., "42P01").
        code: Option<String>,
    },

    /// `CREATE DATABASE` failed.
    #[error("Failed to create database '{database}': {message}")]
    DatabaseCreate {
        /// Name of the database being created.
        database: String,
        /// Human-readable error message.
        message: String,
        /// Underlying server error.
        #[source]
        source: Option<Box<PgTestError>>,
    },

    /// `DROP DATABASE` failed.
    #[error("Failed to drop database '{database}': {message}")]
    DatabaseDrop {
        /// Name of the database being dropped.
        database: String,
        /// Human-readable error message.
        message: String,
        /// Underlying server error.
        #[source]
        source: Option<Box<PgTestError>>,
    },

    /// An extension could not be installed.
    #[error("Failed to install extension '{extension}' into '{database}': {message}")]
    Extension {
        /// The extension that failed.
        extension: String,
        /// Target database.
        database: String,
        /// Human-readable error message.
        message: String,
    },

    /// A seed file does not exist.
    #[error("SQL file not found: {}", path.display())]
    FileNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// A seed file exists but could not be read.
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        /// The path being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A single-row query returned no rows.
    #[error("Query returned no rows")]
    NoRows,

    /// A single-row query returned more than one row.
    #[error("Query returned {count} rows, expected at most one")]
    MultipleRows {
        /// Number of rows returned.
        count: usize,
    },

    /// An external migration tool exited unsuccessfully.
    #[error("External tool '{program}' failed ({}): {}", exit_label(*exit_code), stderr.trim())]
    ExternalTool {
        /// Program that was run.
        program: String,
        /// Exit code, `None` if killed by a signal or never started.
        exit_code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The client was used before `connect()`.
    #[error("Client for '{database}' is not connected")]
    NotConnected {
        /// Database the client targets.
        database: String,
    },

    /// The client was used after `close()`.
    #[error("Connection to '{database}' is closed")]
    ClosedConnection {
        /// Database the client targeted.
        database: String,
    },

    /// The before/after isolation protocol was misused.
    #[error("Isolation error: {message}")]
    Isolation {
        /// Human-readable error message.
        message: String,
    },

    /// A seed adapter failed.
    #[error("Seed adapter '{adapter}' failed: {source}")]
    Seed {
        /// Kind of adapter that failed.
        adapter: &'static str,
        /// The adapter's error.
        #[source]
        source: Box<PgTestError>,
    },

    /// Setup failed and the cleanup that followed failed too.
    #[error("{source} (cleanup also failed: {})", join_errors(cleanup))]
    SetupFailed {
        /// The error that aborted setup.
        #[source]
        source: Box<PgTestError>,
        /// Errors raised while cleaning up.
        cleanup: Vec<PgTestError>,
    },

    /// A row value could not be converted to the requested type.
    #[error("Failed to decode column '{column}': {message}")]
    Decode {
        /// Column name.
        column: String,
        /// Human-readable error message.
        message: String,
    },

    /// Configuration error.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

fn join_errors(errors: &[PgTestError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl PgTestError {
    // ========== Constructors ==========

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a database creation error wrapping the server error.
    pub fn database_create(database: impl Into<String>, source: PgTestError) -> Self {
        Self::DatabaseCreate {
            database: database.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a database drop error wrapping the server error.
    pub fn database_drop(database: impl Into<String>, source: PgTestError) -> Self {
        Self::DatabaseDrop {
            database: database.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an extension installation error.
    pub fn extension(
        extension: impl Into<String>,
        database: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Extension {
            extension: extension.into(),
            database: database.into(),
            message: message.into(),
        }
    }

    /// Create an isolation protocol error.
    pub fn isolation(message: impl Into<String>) -> Self {
        Self::Isolation { message: message.into() }
    }

    /// Wrap an adapter failure.
    pub fn seed(adapter: &'static str, source: PgTestError) -> Self {
        Self::Seed { adapter, source: Box::new(source) }
    }

    /// Attach cleanup failures to the error that aborted setup.
    ///
    /// Returns `source` unchanged when `cleanup` is empty.
    pub fn setup_failed(source: PgTestError, cleanup: Vec<PgTestError>) -> Self {
        if cleanup.is_empty() {
            source
        } else {
            Self::SetupFailed { source: Box::new(source), cleanup }
        }
    }

    /// Create a decode error.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode { column: column.into(), message: message.into() }
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    // ========== Methods ==========

    /// Follow `Seed` and `SetupFailed` wrappers to the error that started it all.
    pub fn root_cause(&self) -> &PgTestError {
        match self {
            Self::Seed { source, .. } | Self::SetupFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this error (or its root cause) is a missing seed file.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::FileNotFound { .. })
    }

    /// Check if this error represents a lost or closed connection.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ClosedConnection { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } | Self::NotConnected { .. } | Self::ClosedConnection { .. } => {
                "Connection"
            }
            Self::Authentication { .. } => "Authentication",
            Self::Query { .. } | Self::NoRows | Self::MultipleRows { .. } | Self::Decode { .. } => {
                "Query"
            }
            Self::DatabaseCreate { .. } | Self::DatabaseDrop { .. } | Self::Extension { .. } => {
                "Admin"
            }
            Self::FileNotFound { .. }
            | Self::Io { .. }
            | Self::ExternalTool { .. }
            | Self::Seed { .. } => "Seed",
            Self::Isolation { .. } => "Isolation",
            Self::SetupFailed { .. } => "Setup",
            Self::Config { .. } => "Config",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Connection { .. } => Some("Check that the database server is running"),
            Self::Authentication { hint, .. } => hint.as_deref(),
            Self::Query { hint, .. } => hint.as_deref(),
            Self::DatabaseCreate { .. } => {
                Some("The configured user needs the CREATEDB privilege")
            }
            Self::DatabaseDrop { .. } => {
                Some("Another session may still be connected to the database")
            }
            Self::Extension { .. } => Some("Check that the extension is available on the server"),
            Self::FileNotFound { .. } => Some("Paths are resolved relative to the working directory"),
            Self::ExternalTool { .. } => Some("Check that the tool is installed and on PATH"),
            Self::NotConnected { .. } => Some("Call connect() before issuing queries"),
            Self::Isolation { .. } => Some("Pair every before_each() with one after_each()"),
            Self::Seed { source, .. } | Self::SetupFailed { source, .. } => source.hint(),
            _ => None,
        }
    }

    /// Get PostgreSQL error code (if applicable).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            Self::DatabaseCreate { source: Some(source), .. }
            | Self::DatabaseDrop { source: Some(source), .. } => source.pg_code(),
            _ => None,
        }
    }

    /// Get position in query (if applicable).
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Query { position, .. } => *position,
            _ => None,
        }
    }
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to PgTestError.
impl From<tokio_postgres::Error> for PgTestError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let detail = db_err.detail().map(String::from);
            let hint = db_err.hint().map(String::from);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let code = Some(db_err.code().code().to_string());

            let code_str = db_err.code().code();
            match code_str {
                "28P01" => {
                    return PgTestError::Authentication {
                        message,
                        hint: Some("Invalid password - check PGPASSWORD".to_string()),
                    }
                }
                "28000" => {
                    return PgTestError::Authentication {
                        message,
                        hint: Some("Authentication failed - check PGUSER and pg_hba.conf".to_string()),
                    }
                }
                // Connection exceptions (08xxx) and admin shutdown (57P01)
                _ if code_str.starts_with("08") || code_str == "57P01" => {
                    return PgTestError::Connection { message, source: Some(Box::new(err)) }
                }
                _ => return PgTestError::Query { message, detail, hint, position, code },
            }
        }

        if err.is_closed() {
            return PgTestError::Connection {
                message: "Connection closed".to_string(),
                source: Some(Box::new(err)),
            };
        }

        PgTestError::Connection { message: err.to_string(), source: Some(Box::new(err)) }
    }
}

/// Convert from serde_json::Error to PgTestError.
impl From<serde_json::Error> for PgTestError {
    fn from(err: serde_json::Error) -> Self {
        PgTestError::Internal {
            message: format!("JSON error: {err}"),
            source: Some(Box::new(err)),
        }
    }
}
