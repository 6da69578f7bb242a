//! Structured logging setup with console and optional file output.
//!
//! Provides:
//! - Daily rotating log files when a log directory is configured
//! - Build-type conditional log levels
//! - Console-only fallback when file logging fails
//! - Environment variable override via PGSQL_TEST_LOG or RUST_LOG
//!
//! Every initializer is safe to call more than once; only the first call
//! installs a subscriber.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "PGSQL_TEST_LOG";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for log files; console only when `None`
    pub log_dir: Option<PathBuf>,
    /// Whether stdout is a terminal (enables ANSI colors)
    pub is_pty: bool,
    /// Optional custom log filter
    pub log_filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { log_dir: None, is_pty: atty::is(atty::Stream::Stdout), log_filter: None }
    }
}

impl LogConfig {
    /// Console plus daily files in `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self { log_dir: Some(log_dir.into()), ..Self::default() }
    }

    /// Set custom log filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Guard that must be held while file logging is needed.
///
/// Dropping this guard flushes pending log entries.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Initialize logging with the given configuration.
///
/// If file logging initialization fails, falls back to console-only.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    let Some(log_dir) = &config.log_dir else {
        return init_stdout_logging(&config);
    };

    match init_file_logging(&config, log_dir) {
        Ok(guard) => LoggingGuard { _worker_guard: Some(guard) },
        Err(e) => {
            eprintln!("Warning: Failed to initialize file logging: {}. Using console only.", e);
            init_stdout_logging(&config)
        }
    }
}

/// Initialize console logging for tests.
///
/// Output goes through the test harness capture, so it only shows for failing
/// tests or with `--nocapture`.
pub fn init_test_logging() {
    static INITIALIZED: OnceLock<()> = OnceLock::new();
    INITIALIZED.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(build_env_filter(None))
            .with_test_writer()
            .without_time()
            .try_init()
            .ok();
    });
}

/// Initialize stdout-only logging.
fn init_stdout_logging(config: &LogConfig) -> LoggingGuard {
    if let Err(e) = stdout_subscriber(config).try_init() {
        tracing::debug!(error = %e, "Logging already initialized");
    }

    LoggingGuard { _worker_guard: None }
}

/// Initialize file + console logging.
fn init_file_logging(
    config: &LogConfig,
    log_dir: &Path,
) -> Result<WorkerGuard, Box<dyn std::error::Error + Send + Sync>> {
    let (subscriber, guard) = file_subscriber(config, log_dir)?;
    subscriber.try_init()?;
    Ok(guard)
}

fn stdout_subscriber(config: &LogConfig) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_ansi(config.is_pty)
        .with_target(false)
        .with_thread_ids(false)
        .finish()
}

/// Console at INFO and above, plus a daily file with whatever the filter lets through.
fn file_subscriber(
    config: &LogConfig,
    log_dir: &Path,
) -> Result<(impl Subscriber + Send + Sync + 'static, WorkerGuard), Box<dyn std::error::Error + Send + Sync>>
{
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("pgsql-test")
        .filename_suffix("log")
        .build(log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stdout = std::io::stdout.with_max_level(tracing::Level::INFO);
    let combined = stdout.and(non_blocking);

    let subscriber = tracing_subscriber::fmt()
        .with_writer(combined)
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .finish();

    Ok((subscriber, guard))
}

/// Build the environment filter from config or defaults.
fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    // Priority: custom filter > PGSQL_TEST_LOG > RUST_LOG > default
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Get the default log filter based on build type.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "info,pgsql_test=debug,tokio_postgres=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "warn,pgsql_test=info,tokio_postgres=warn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(default_log_filter()).is_ok());
    }

    #[test]
    fn test_invalid_custom_filter_falls_back() {
        let filter = build_env_filter(Some("pgsql_test=[not valid"));
        assert_eq!(filter.to_string(), EnvFilter::new(default_log_filter()).to_string());
    }

    #[test]
    fn test_stdout_subscriber_honors_custom_filter() {
        let config = LogConfig { is_pty: false, ..LogConfig::default() }.with_filter("off");
        tracing::subscriber::with_default(stdout_subscriber(&config), || {
            assert!(!tracing::enabled!(tracing::Level::ERROR));
        });

        let config = config.with_filter("pgsql_test=debug");
        tracing::subscriber::with_default(stdout_subscriber(&config), || {
            assert!(tracing::enabled!(tracing::Level::DEBUG));
        });
    }

    #[test]
    fn test_file_subscriber_writes_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let config = LogConfig::new(&log_dir).with_filter("debug");

        let (subscriber, guard) = file_subscriber(&config, &log_dir).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(database = "pgsql_test_unit", "file sink check");
        });
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("pgsql-test"), "unexpected file name {name}");
        assert!(name.ends_with(".log"));

        let contents = std::fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("file sink check"));
        assert!(contents.contains("pgsql_test_unit"));
    }

    #[test]
    fn test_file_subscriber_reports_unusable_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(file_subscriber(&LogConfig::default(), file.path()).is_err());
    }
}
