//! Backup orchestrator: drives pg_dump / pg_restore / psql through a
//! [`ProcessRunner`] and classifies their outcome.
//!
//! Every invocation gets the same per-process timeout, and credentials travel
//! via `PGPASSWORD` / `PGSSLMODE` rather than the argument list.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pgkeeper_core::{Datasource, DumpFormat};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::compression;
use crate::error::{BackupError, Result};
use crate::runner::ProcessRunner;
use crate::truncate::{truncate_output, MAX_ERROR_OUTPUT_CHARS};
use crate::types::{BackupArtifact, Invocation, RestoreMode, RestoreOutcome};

/// Drops every non-system schema, then recreates an empty `public`.
///
/// Runs as separate statements without a wrapping transaction, so a failure
/// midway (typically lock exhaustion on very large schemas, see
/// `max_locks_per_transaction`) leaves the database partially cleared.
pub const CLEAR_SCHEMAS_SQL: &str = r#"
DO $$ DECLARE
    schema_name text;
BEGIN
    FOR schema_name IN
        SELECT nspname FROM pg_namespace
        WHERE nspname NOT IN ('pg_catalog', 'information_schema', 'public')
        AND nspname NOT LIKE 'pg_toast%'
        AND nspname NOT LIKE 'pg_temp%'
    LOOP
        EXECUTE format('DROP SCHEMA IF EXISTS %I CASCADE', schema_name);
    END LOOP;
END $$;

DROP SCHEMA IF EXISTS public CASCADE;
CREATE SCHEMA public;
"#;

/// The substring that turns a restore into a hard failure, whatever the
/// tool's exit status.
const RESTORE_ERROR_MARKER: &str = "ERROR";

/// Backup and restore against one database engine.
#[async_trait]
pub trait BackupOrchestrator: Send + Sync {
    /// Dump `ds` to `<dest_name><ext>.gz` and return the dump tool's output.
    ///
    /// A bare `dest_name` is placed in the backup directory; one carrying its
    /// own directory is used as-is.
    async fn backup(&self, ds: &Datasource, dest_name: &str, format: DumpFormat)
        -> Result<BackupArtifact>;

    /// Clear the target schemas and load `file` into `ds`.
    async fn restore(&self, ds: &Datasource, file: &Path) -> Result<RestoreOutcome>;
}

/// PostgreSQL orchestrator built on the client binaries.
pub struct PostgresOrchestrator {
    runner: Arc<dyn ProcessRunner>,
    backup_dir: PathBuf,
    timeout: Duration,
}

impl PostgresOrchestrator {
    /// Create the orchestrator, creating `backup_dir` if it does not exist.
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        backup_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self> {
        let backup_dir = backup_dir.into();
        std::fs::create_dir_all(&backup_dir).map_err(|source| BackupError::Filesystem {
            path: backup_dir.clone(),
            source,
        })?;
        Ok(Self {
            runner,
            backup_dir,
            timeout,
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Run a trivial query to prove the server is reachable with these
    /// credentials.
    #[instrument(skip(self, ds), fields(datasource_id = %ds.id))]
    pub async fn test_connection(&self, ds: &Datasource) -> Result<()> {
        let inv = self
            .psql(ds, &ds.database)
            .args(["-c", "SELECT 1"]);
        match self.runner.run(&inv).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(BackupError::Connectivity {
                output: truncate_output(&out.output, MAX_ERROR_OUTPUT_CHARS),
            }),
            Err(e) => Err(BackupError::Connectivity {
                output: e.to_string(),
            }),
        }
    }

    /// Drop every non-system schema and recreate `public`. Destructive.
    #[instrument(skip(self, ds), fields(datasource_id = %ds.id))]
    pub async fn clear_schemas(&self, ds: &Datasource) -> Result<()> {
        info!(database = %ds.database, "clearing database schemas");
        let inv = self
            .psql(ds, &ds.database)
            .args(["-c", CLEAR_SCHEMAS_SQL]);
        self.run_checked(&inv).await?;
        info!(database = %ds.database, "database schemas cleared");
        Ok(())
    }

    /// `CREATE DATABASE` for `ds.database`, issued from the `postgres`
    /// maintenance database.
    pub async fn create_database(&self, ds: &Datasource) -> Result<()> {
        let sql = format!("CREATE DATABASE {};", quote_ident(&ds.database));
        let inv = self.psql(ds, "postgres").args(["-c".to_string(), sql]);
        self.run_checked(&inv).await.map(|_| ())
    }

    /// `DROP DATABASE` for `ds.database`. Fails while other sessions are
    /// connected to it.
    pub async fn drop_database(&self, ds: &Datasource) -> Result<()> {
        let sql = format!("DROP DATABASE {};", quote_ident(&ds.database));
        let inv = self.psql(ds, "postgres").args(["-c".to_string(), sql]);
        self.run_checked(&inv).await.map(|_| ())
    }

    // --- private helpers ---------------------------------------------------

    /// Base invocation carrying connection flags and credential env.
    fn base(&self, program: &str, ds: &Datasource) -> Invocation {
        Invocation::new(program, self.timeout)
            .args([
                "-h".to_string(),
                ds.host.clone(),
                "-p".to_string(),
                ds.port.to_string(),
                "-U".to_string(),
                ds.username.clone(),
            ])
            .env("PGPASSWORD", ds.password.clone())
            .env("PGSSLMODE", ds.ssl_mode.clone())
    }

    fn psql(&self, ds: &Datasource, database: &str) -> Invocation {
        self.base("psql", ds).args(["-d", database])
    }

    /// Run and require a zero exit status.
    async fn run_checked(&self, inv: &Invocation) -> Result<String> {
        let out = self.runner.run(inv).await?;
        if !out.success() {
            return Err(BackupError::ProcessExecution {
                program: inv.program.clone(),
                reason: out.exit_description(),
                output: truncate_output(&out.output, MAX_ERROR_OUTPUT_CHARS),
            });
        }
        Ok(out.output)
    }

    fn resolve_destination(&self, dest_name: &str) -> PathBuf {
        let dest = Path::new(dest_name);
        let has_dir = dest
            .parent()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if dest.is_absolute() || has_dir {
            dest.to_path_buf()
        } else {
            self.backup_dir.join(dest)
        }
    }
}

#[async_trait]
impl BackupOrchestrator for PostgresOrchestrator {
    #[instrument(skip(self, ds), fields(datasource_id = %ds.id))]
    async fn backup(
        &self,
        ds: &Datasource,
        dest_name: &str,
        format: DumpFormat,
    ) -> Result<BackupArtifact> {
        self.test_connection(ds).await?;

        let base = self.resolve_destination(dest_name);
        if let Some(parent) = base.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| BackupError::Filesystem {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let tmp = with_suffix(&base, format.extension());
        let final_path = with_suffix(&base, &format!("{}.gz", format.extension()));

        let inv = self
            .base("pg_dump", ds)
            .args(["--no-owner", "-d", ds.database.as_str(), "-F", format.pg_flag(), "-v", "-f"])
            .arg(tmp.to_string_lossy());

        info!(database = %ds.database, file = %tmp.display(), %format, "running pg_dump");
        let output = self.run_checked(&inv).await?;

        // A failure here leaves the uncompressed dump at `tmp`.
        compression::compress(&tmp, &final_path)
            .await
            .map_err(|source| BackupError::Compression {
                path: tmp.clone(),
                output: output.clone(),
                source,
            })?;

        info!(file = %final_path.display(), "backup written");
        Ok(BackupArtifact {
            output,
            path: final_path,
        })
    }

    #[instrument(skip(self, ds), fields(datasource_id = %ds.id, file = %file.display()))]
    async fn restore(&self, ds: &Datasource, file: &Path) -> Result<RestoreOutcome> {
        let mode = RestoreMode::detect(file).ok_or_else(|| BackupError::UnsupportedFormat {
            path: file.to_path_buf(),
        })?;
        tokio::fs::metadata(file)
            .await
            .map_err(|source| BackupError::Filesystem {
                path: file.to_path_buf(),
                source,
            })?;

        // Runs before the restore tool is touched, and regardless of how the
        // restore itself ends.
        self.clear_schemas(ds).await?;

        let _transient;
        let input = if mode.is_compressed() {
            let target = transient_sibling(file);
            _transient = RemoveOnDrop(target.clone());
            compression::decompress_to(file, &target)
                .await
                .map_err(|source| BackupError::Decompression {
                    path: file.to_path_buf(),
                    source,
                })?;
            target
        } else {
            file.to_path_buf()
        };

        let input_arg = input.to_string_lossy().into_owned();
        let inv = match mode.format() {
            DumpFormat::Custom => self
                .base("pg_restore", ds)
                .args(["--no-owner", "-d", ds.database.as_str(), "-v"])
                .arg(input_arg),
            DumpFormat::Plain => self.psql(ds, &ds.database).args(["-f".to_string(), input_arg]),
        };

        info!(database = %ds.database, program = %inv.program, "restoring database");
        let (output, failure) = match self.runner.run(&inv).await {
            Ok(out) if out.success() => (out.output, None),
            Ok(out) => {
                let reason = out.exit_description();
                (out.output, Some(reason))
            }
            Err(e) => (String::new(), Some(e.to_string())),
        };

        if output.contains(RESTORE_ERROR_MARKER) {
            return Err(BackupError::ProcessExecution {
                program: inv.program.clone(),
                reason: failure.unwrap_or_else(|| "output reported ERROR".to_string()),
                output: truncate_output(&output, MAX_ERROR_OUTPUT_CHARS),
            });
        }
        if let Some(reason) = &failure {
            warn!(program = %inv.program, %reason, "restore finished with warnings");
        } else {
            debug!("restore finished cleanly");
        }
        Ok(RestoreOutcome {
            output,
            warning: failure,
        })
    }
}

/// Deletes the wrapped path when dropped; missing files are ignored.
struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(file = %self.0.display(), "transient restore file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %self.0.display(), error = %e, "could not remove transient restore file"),
        }
    }
}

/// Unique sibling of `file` for the decompressed copy, so an existing
/// uncompressed dump next to it is never overwritten.
fn transient_sibling(file: &Path) -> PathBuf {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".gz").unwrap_or(&name);
    let short = Uuid::new_v4().simple().to_string();
    file.with_file_name(format!(".{stem}.{}.restore", &short[..8]))
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
