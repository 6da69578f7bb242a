//! External migration tools run as subprocesses.

use crate::error::PgTestError;
use crate::seed::SeedContext;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

/// A migration command run against the database being seeded.
///
/// The child inherits the parent environment plus `PGHOST`, `PGPORT`,
/// `PGDATABASE`, `PGUSER` and `PGPASSWORD` for the target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalMigration {
    program: String,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    database_arg: Option<String>,
}

impl ExternalMigration {
    /// Run `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), current_dir: None, database_arg: None }
    }

    /// `pgpm deploy` for `package`, run inside `module_path`.
    pub fn pgpm(module_path: impl Into<PathBuf>, package: impl Into<String>) -> Self {
        Self::new("pgpm")
            .args(["deploy", "--yes", "--package"])
            .arg(package.into())
            .current_dir(module_path)
            .with_database_arg("--database")
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Working directory of the child.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Also pass the target database name after `flag`, e.g. `--database <name>`.
    pub fn with_database_arg(mut self, flag: impl Into<String>) -> Self {
        self.database_arg = Some(flag.into());
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Fixed arguments, without the database argument.
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Working directory, if set.
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Run the command to completion.
    pub async fn seed(&self, ctx: &SeedContext<'_>) -> Result<(), PgTestError> {
        let start = Instant::now();

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .envs(ctx.config.libpq_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(flag) = &self.database_arg {
            command.arg(flag).arg(&ctx.config.database);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        tracing::debug!(
            program = %self.program,
            args = ?self.args,
            current_dir = ?self.current_dir,
            database = %ctx.config.database,
            "Running external migration"
        );

        let output = command.output().await.map_err(|e| {
            let err = PgTestError::ExternalTool {
                program: self.program.clone(),
                exit_code: None,
                stdout: String::new(),
                stderr: format!("failed to start: {e}"),
            };
            tracing::error!(error = %err, "External migration could not start");
            err
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let err = PgTestError::ExternalTool {
                program: self.program.clone(),
                exit_code: output.status.code(),
                stdout,
                stderr,
            };
            tracing::error!(error = %err, "External migration failed");
            return Err(err);
        }

        tracing::info!(
            program = %self.program,
            database = %ctx.config.database,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "External migration finished"
        );
        if !stdout.trim().is_empty() {
            tracing::trace!(program = %self.program, output = %stdout.trim(), "Migration output");
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::seed::TestParts;

    fn sh(script: &str) -> ExternalMigration {
        ExternalMigration::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_captured() {
        let parts = TestParts::new();
        let err = sh("echo partial; echo 'relation missing' >&2; exit 3")
            .seed(&parts.ctx())
            .await
            .unwrap_err();

        match err {
            PgTestError::ExternalTool { program, exit_code, stdout, stderr } => {
                assert_eq!(program, "sh");
                assert_eq!(exit_code, Some(3));
                assert_eq!(stdout.trim(), "partial");
                assert_eq!(stderr.trim(), "relation missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_child_sees_target_database() {
        let parts = TestParts::new();
        sh(r#"test "$PGDATABASE" = pgsql_test_unit && test -n "$PGPORT""#)
            .seed(&parts.ctx())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_database_arg_is_appended() {
        let parts = TestParts::new();
        // sh -c '<script>' <$0> <$1>: the flag lands in $0 and the name in $1.
        sh(r#"test "$0" = --database && test "$1" = pgsql_test_unit"#)
            .with_database_arg("--database")
            .seed(&parts.ctx())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_runs_in_current_dir() {
        let parts = TestParts::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();

        sh("test -f marker").current_dir(dir.path()).seed(&parts.ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_fails_without_exit_code() {
        let parts = TestParts::new();
        let err = ExternalMigration::new("pgsql-test-no-such-tool")
            .seed(&parts.ctx())
            .await
            .unwrap_err();

        match err {
            PgTestError::ExternalTool { exit_code, stderr, .. } => {
                assert_eq!(exit_code, None);
                assert!(stderr.starts_with("failed to start"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pgpm_command_line() {
        let migration = ExternalMigration::pgpm("/work/packages/app", "app");
        assert_eq!(migration.program(), "pgpm");
        assert_eq!(migration.get_args(), &["deploy", "--yes", "--package", "app"]);
        assert_eq!(migration.get_current_dir(), Some(Path::new("/work/packages/app")));
    }
}
