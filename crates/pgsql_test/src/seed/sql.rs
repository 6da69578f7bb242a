//! SQL file seeding.

use crate::error::PgTestError;
use crate::seed::SeedContext;

use std::path::{Path, PathBuf};

/// A list of SQL files executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFileSeed {
    paths: Vec<PathBuf>,
}

impl SqlFileSeed {
    /// Create a seed from file paths.
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> Self {
        Self { paths: paths.into_iter().map(Into::into).collect() }
    }

    /// Files in execution order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Execute every file through the privileged client.
    ///
    /// Each file is read whole and sent as one batch, so it may hold any number
    /// of statements. Stops at the first missing file or failing statement.
    pub async fn seed(&self, ctx: &SeedContext<'_>) -> Result<(), PgTestError> {
        for path in &self.paths {
            let sql = read_sql(path).await?;
            ctx.pg.batch_execute(&sql).await?;
            tracing::info!(
                database = %ctx.config.database,
                file = %path.display(),
                bytes = sql.len(),
                "Applied SQL file"
            );
        }
        Ok(())
    }
}

async fn read_sql(path: &Path) -> Result<String, PgTestError> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PgTestError::FileNotFound { path: path.to_path_buf() }
        } else {
            PgTestError::Io { path: path.to_path_buf(), source: e }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::TestParts;
    use std::io::Write;

    #[tokio::test]
    async fn test_missing_file_is_reported_before_execution() {
        let parts = TestParts::new();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.sql");

        let seed = SqlFileSeed::new([missing.clone()]);
        let err = seed.seed(&parts.ctx()).await.unwrap_err();

        assert!(matches!(err, PgTestError::FileNotFound { ref path } if *path == missing));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_existing_file_is_sent_to_the_client() {
        let parts = TestParts::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "CREATE TABLE users (id SERIAL PRIMARY KEY, name TEXT);").unwrap();

        // The unconnected client is reached only after the file was read.
        let seed = SqlFileSeed::new([file.path()]);
        let err = seed.seed(&parts.ctx()).await.unwrap_err();

        assert!(matches!(err, PgTestError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_directory_is_an_io_error() {
        let parts = TestParts::new();
        let dir = tempfile::tempdir().unwrap();

        let err = SqlFileSeed::new([dir.path()]).seed(&parts.ctx()).await.unwrap_err();

        assert!(matches!(err, PgTestError::Io { .. }));
    }

    #[test]
    fn test_paths_keep_order() {
        let seed = SqlFileSeed::new(["b.sql", "a.sql"]);
        assert_eq!(seed.paths(), &[PathBuf::from("b.sql"), PathBuf::from("a.sql")]);
    }
}
