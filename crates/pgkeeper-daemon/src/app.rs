use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pgkeeper_backup::{PostgresOrchestrator, ProcessRunner, TokioProcessRunner};
use pgkeeper_core::{BackupRecord, BackupTrigger, CredentialCodec, Datasource, KeeperConfig};
use pgkeeper_scheduler::{
    schedule, CommandError, ExecutionCommand, Scheduler, TaskId, TaskKind, TaskRegistry,
};
use pgkeeper_store::{db::init_db, DatasourceCatalog, SqliteBackupStore, SqliteCatalog};
use rusqlite::Connection;
use tokio::sync::oneshot;
use tracing::info;

/// Everything a subcommand needs, wired once from config.
pub struct App {
    pub config: KeeperConfig,
    pub codec: Arc<CredentialCodec>,
    pub catalog: Arc<SqliteCatalog>,
    pub records: Arc<SqliteBackupStore>,
    pub orchestrator: Arc<PostgresOrchestrator>,
    pub command: Arc<ExecutionCommand>,
    pub tasks: TaskRegistry,
}

/// Edits accepted by `datasource update`. `None` keeps the stored value.
#[derive(Debug, Default)]
pub struct DatasourceChanges {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    /// Plaintext; encrypted before it reaches the catalog.
    pub password: Option<String>,
    pub ssl_mode: Option<String>,
    pub schedule: Option<String>,
    pub description: Option<String>,
}

impl App {
    pub fn open(config: KeeperConfig) -> anyhow::Result<Self> {
        Self::open_with_runner(config, Arc::new(TokioProcessRunner))
    }

    /// [`App::open`] with the process runner swapped out.
    pub fn open_with_runner(
        config: KeeperConfig,
        runner: Arc<dyn ProcessRunner>,
    ) -> anyhow::Result<Self> {
        let codec = Arc::new(CredentialCodec::from_base64_key(config.encryption_key()?)?);

        let db_path = config.database.path.clone();
        ensure_parent_dir(&db_path)?;
        info!(path = %db_path, "opening SQLite database");
        {
            let db = open_db(&db_path)?;
            init_db(&db)?;
        }

        // One connection per component, as each guards its own with a mutex.
        let catalog = Arc::new(SqliteCatalog::new(open_db(&db_path)?));
        let records = Arc::new(SqliteBackupStore::new(open_db(&db_path)?));

        let orchestrator = Arc::new(
            PostgresOrchestrator::new(
                runner,
                &config.backup.dir,
                Duration::from_secs(config.backup.process_timeout_secs),
            )
            .with_context(|| format!("preparing backup directory {}", config.backup.dir))?,
        );

        let command = Arc::new(ExecutionCommand::new(
            records.clone(),
            catalog.clone(),
            orchestrator.clone(),
            codec.clone(),
            config.backup.format,
        ));

        Ok(Self {
            config,
            codec,
            catalog,
            records,
            orchestrator,
            command,
            tasks: TaskRegistry::new(),
        })
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        let interval = Duration::from_secs(self.config.scheduler.reconcile_interval_secs.max(1));
        Arc::new(Scheduler::new(self.catalog.clone(), self.command.clone(), interval))
    }

    /// Rewrite a datasource in place. Its id, enabled flag and backups are
    /// untouched; a new password is encrypted with the configured key.
    pub fn update_datasource(
        &self,
        id: &str,
        changes: DatasourceChanges,
    ) -> anyhow::Result<Datasource> {
        let mut ds = self.catalog.get(id)?;
        if let Some(expression) = changes.schedule {
            schedule::validate(&expression)?;
            ds.schedule.expression = expression;
        }
        if let Some(description) = changes.description {
            ds.schedule.description = description;
        }
        if let Some(host) = changes.host {
            ds.host = host;
        }
        if let Some(port) = changes.port {
            ds.port = port;
        }
        if let Some(database) = changes.database {
            ds.database = database;
        }
        if let Some(username) = changes.username {
            ds.username = username;
        }
        if let Some(ssl_mode) = changes.ssl_mode {
            ds.ssl_mode = ssl_mode;
        }
        if let Some(password) = changes.password {
            ds = Datasource { password, ..ds }.encrypted(&self.codec)?;
        }
        self.catalog.update(&ds)?;
        info!(datasource_id = %ds.id, "datasource updated");
        Ok(ds)
    }

    /// Start a manual backup as a detached task. The receiver yields the
    /// record this run produced once the task completes; it is closed
    /// without a value when the run fails.
    pub fn spawn_backup(
        &self,
        datasource_id: &str,
    ) -> anyhow::Result<(TaskId, oneshot::Receiver<BackupRecord>)> {
        let ds = self.catalog.get(datasource_id)?;
        let command = self.command.clone();
        let (tx, rx) = oneshot::channel();
        let task = self.tasks.spawn(TaskKind::Backup, ds.id.clone(), async move {
            let record = command.run(&ds, BackupTrigger::Manual).await?;
            let _ = tx.send(record);
            Ok::<(), CommandError>(())
        });
        Ok((task, rx))
    }

    /// Catalog entry with its password decrypted, ready for the client tools.
    pub fn decrypted_datasource(&self, id: &str) -> anyhow::Result<Datasource> {
        let ds = self.catalog.get(id)?;
        Ok(ds.decrypted(&self.codec)?)
    }
}

fn open_db(path: &str) -> anyhow::Result<Connection> {
    let db = Connection::open(path).with_context(|| format!("opening {path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(db)
}

fn ensure_parent_dir(path: &str) -> anyhow::Result<()> {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display())),
        _ => Ok(()),
    }
}
