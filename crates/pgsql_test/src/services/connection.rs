//! Single, exclusively owned PostgreSQL connections.
//!
//! A [`Session`] wraps one `tokio_postgres::Client` and the background task that
//! drives its socket. Both the admin connection and the test clients sit on top of it.

use crate::error::PgTestError;
use crate::models::ConnectionConfig;

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

/// How long `close()` waits for the driver task to flush the terminate message.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a session: connect once, close once.
enum SessionState {
    Disconnected,
    Connected(Arc<Client>),
    Closed,
}

/// One connection to one database.
pub struct Session {
    config: ConnectionConfig,
    state: RwLock<SessionState>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create an unconnected session.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config, state: RwLock::new(SessionState::Disconnected), driver: Mutex::new(None) }
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open the connection. Connecting an already connected session is a no-op.
    pub async fn connect(&self) -> Result<(), PgTestError> {
        match &*self.state.read() {
            SessionState::Connected(_) => return Ok(()),
            SessionState::Closed => return Err(self.closed_error()),
            SessionState::Disconnected => {}
        }

        self.config.validate().map_err(PgTestError::config)?;

        let connect_timeout = Duration::from_secs(self.config.options.connect_timeout_secs as u64);

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&self.config.host);
        pg_config.port(self.config.port);
        pg_config.dbname(&self.config.database);
        pg_config.user(&self.config.user);
        pg_config.password(&self.config.password);
        pg_config.application_name(&self.config.options.application_name);
        pg_config.connect_timeout(connect_timeout);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(60));

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            let err = PgTestError::from(e);
            tracing::error!(
                host = %self.config.host,
                database = %self.config.database,
                error = %err,
                "Failed to connect"
            );
            err
        })?;

        let database = self.config.database.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(database = %database, error = %e, "Connection driver exited with error");
            }
        });

        *self.state.write() = SessionState::Connected(Arc::new(client));
        *self.driver.lock() = Some(driver);

        tracing::debug!(
            host = %self.config.host,
            database = %self.config.database,
            user = %self.config.user,
            "Connected"
        );

        Ok(())
    }

    /// Get the live client.
    pub fn client(&self) -> Result<Arc<Client>, PgTestError> {
        match &*self.state.read() {
            SessionState::Connected(client) => Ok(client.clone()),
            SessionState::Disconnected => {
                Err(PgTestError::NotConnected { database: self.config.database.clone() })
            }
            SessionState::Closed => Err(self.closed_error()),
        }
    }

    /// Check if the session holds a live connection.
    pub fn is_connected(&self) -> bool {
        matches!(&*self.state.read(), SessionState::Connected(client) if !client.is_closed())
    }

    /// Check if the session has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(&*self.state.read(), SessionState::Closed)
    }

    /// Close the connection. Later calls are no-ops; later queries fail.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), SessionState::Closed);
        let driver = self.driver.lock().take();

        let SessionState::Connected(client) = previous else {
            return;
        };
        // The driver finishes once the last client handle is gone.
        drop(client);

        if let Some(mut driver) = driver {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut driver).await.is_err() {
                tracing::warn!(database = %self.config.database, "Connection driver did not stop, aborting");
                driver.abort();
            }
        }

        tracing::debug!(database = %self.config.database, "Connection closed");
    }

    fn closed_error(&self) -> PgTestError {
        PgTestError::ClosedConnection { database: self.config.database.clone() }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.config.display_url())
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("pgsql_test_abc"), "\"pgsql_test_abc\"");
        assert_eq!(quote_ident("uuid-ossp"), "\"uuid-ossp\"");
        assert_eq!(quote_ident("a\"; DROP DATABASE x; --"), "\"a\"\"; DROP DATABASE x; --\"");
    }

    #[test]
    fn test_unconnected_session_reports_not_connected() {
        let session = Session::new(ConnectionConfig::default());
        assert!(!session.is_connected());
        assert!(matches!(session.client(), Err(PgTestError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let session = Session::new(ConnectionConfig::default().with_database("gone"));
        session.close().await;
        session.close().await;
        assert!(session.is_closed());

        let err = session.client().unwrap_err();
        assert!(matches!(err, PgTestError::ClosedConnection { ref database } if database == "gone"));

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, PgTestError::ClosedConnection { .. }));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let mut config = ConnectionConfig::default();
        config.host.clear();
        let session = Session::new(config);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, PgTestError::Config { .. }));
    }
}
