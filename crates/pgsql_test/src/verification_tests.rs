//! Cross-module checks that run without a database server.
//!
//! - Passwords never reach log output or debug formatting
//! - Common failures carry actionable hints
//! - Generated database names stay unique across threads
//! - Setup errors keep the root cause reachable through every wrapper

#[cfg(test)]
mod tests {
    use crate::error::PgTestError;
    use crate::manager::{generate_test_db_name, ConnectionManager, TestDbOptions};
    use crate::models::ConnectionConfig;
    use crate::services::{DbAdmin, PgTestClient};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::io::{self, Write};
    use std::sync::Arc;

    const SECRET: &str = "s3cret-pw-do-not-log";

    /// Log sink shared with the subscriber.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn capture_subscriber(sink: &Captured) -> impl tracing::Subscriber + Send + Sync {
        let sink = sink.clone();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish()
    }

    /// Nothing listens on port 1, so connecting fails fast without a server.
    fn unreachable_config() -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", 1, "postgres", "postgres", SECRET)
            .with_connect_timeout_secs(2)
    }

    // =========================================================================
    // Passwords stay out of logs
    // =========================================================================

    #[tokio::test]
    async fn test_failed_connect_does_not_log_password() {
        let sink = Captured::default();
        let _guard = tracing::subscriber::set_default(capture_subscriber(&sink));

        let admin = DbAdmin::new(unreachable_config());
        let err = admin.connect().await.unwrap_err();
        assert!(err.is_connection_lost(), "unexpected error: {err:?}");

        let client = PgTestClient::new(unreachable_config());
        assert!(client.connect().await.is_err());

        let logs = sink.text();
        assert!(logs.contains("127.0.0.1"), "expected a connect failure event, got: {logs}");
        assert!(!logs.contains(SECRET));
        assert!(!err.to_string().contains(SECRET));
    }

    #[tokio::test]
    async fn test_failed_open_does_not_log_password() {
        let sink = Captured::default();
        let _guard = tracing::subscriber::set_default(capture_subscriber(&sink));

        let manager = ConnectionManager::new(unreachable_config(), TestDbOptions::default());
        assert!(manager.open(vec![]).await.is_err());

        assert!(!sink.text().contains(SECRET));
    }

    #[test]
    fn test_debug_output_redacts_password() {
        let config = unreachable_config();
        let manager = ConnectionManager::new(config.clone(), TestDbOptions::default());
        let admin = DbAdmin::new(config.clone());
        let client = PgTestClient::new(config.clone());

        for rendered in [
            format!("{config:?}"),
            format!("{manager:?}"),
            format!("{admin:?}"),
            format!("{client:?}"),
            config.display_url(),
        ] {
            assert!(!rendered.contains(SECRET), "leaked in: {rendered}");
        }
    }

    // =========================================================================
    // Actionable hints
    // =========================================================================

    #[test]
    fn test_common_failures_have_hints() {
        let cases = [
            PgTestError::connection("connection refused"),
            PgTestError::database_create("pgsql_test_x", PgTestError::internal("permission denied")),
            PgTestError::database_drop("pgsql_test_x", PgTestError::internal("in use")),
            PgTestError::extension("postgis", "pgsql_test_x", "not available"),
            PgTestError::FileNotFound { path: "schema.sql".into() },
            PgTestError::ExternalTool {
                program: "pgpm".into(),
                exit_code: None,
                stdout: String::new(),
                stderr: "failed to start".into(),
            },
            PgTestError::NotConnected { database: "pgsql_test_x".into() },
            PgTestError::isolation("after_each() called without a matching before_each()"),
        ];

        for error in cases {
            assert!(error.hint().is_some(), "no hint for {error:?}");
        }
    }

    #[test]
    fn test_hints_survive_wrapping() {
        let missing = PgTestError::FileNotFound { path: "schema.sql".into() };
        let expected = missing.hint().map(str::to_owned);

        let wrapped = PgTestError::setup_failed(
            PgTestError::seed("sqlfile", missing),
            vec![PgTestError::connection("gone")],
        );

        assert_eq!(wrapped.hint().map(str::to_owned), expected);
        assert!(wrapped.is_not_found());
    }

    // =========================================================================
    // Naming
    // =========================================================================

    #[test]
    fn test_names_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..250).map(|_| generate_test_db_name("pgsql_test_")).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut names = HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                assert!(names.insert(name));
            }
        }
        assert_eq!(names.len(), 2000);
    }
}
