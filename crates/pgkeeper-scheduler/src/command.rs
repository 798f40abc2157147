//! Execution Command: one backup (or restore, or deletion) wrapped in the
//! backup record lifecycle.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pgkeeper_backup::{BackupOrchestrator, RestoreOutcome};
use pgkeeper_core::{BackupRecord, BackupStatus, BackupTrigger, CredentialCodec, Datasource, DumpFormat};
use pgkeeper_store::{BackupRecordStore, DatasourceCatalog};
use tracing::{error, info, instrument, warn};

use crate::error::{CommandError, CommandResult};
use crate::types::JobCommand;

pub struct ExecutionCommand {
    records: Arc<dyn BackupRecordStore>,
    catalog: Arc<dyn DatasourceCatalog>,
    orchestrator: Arc<dyn BackupOrchestrator>,
    codec: Arc<CredentialCodec>,
    format: DumpFormat,
}

impl ExecutionCommand {
    pub fn new(
        records: Arc<dyn BackupRecordStore>,
        catalog: Arc<dyn DatasourceCatalog>,
        orchestrator: Arc<dyn BackupOrchestrator>,
        codec: Arc<CredentialCodec>,
        format: DumpFormat,
    ) -> Self {
        Self {
            records,
            catalog,
            orchestrator,
            codec,
            format,
        }
    }

    /// Run one backup of `ds` and return the completed record.
    ///
    /// The record is persisted as `initialized` before anything else happens.
    /// Every later failure moves it to `failed` before the error is returned;
    /// a store error while recording that is logged, not returned. Only a
    /// failure to create the record leaves nothing behind.
    #[instrument(skip(self, ds, trigger), fields(datasource_id = %ds.id, %trigger))]
    pub async fn run(&self, ds: &Datasource, trigger: BackupTrigger) -> CommandResult<BackupRecord> {
        let mut record = BackupRecord::begin(&ds.id, trigger);
        self.records.create(&record)?;
        info!(backup_id = %record.id, "backup run started");

        match self.attempt(ds).await {
            Ok((path, size)) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                record.complete(path.to_string_lossy(), name, size);
                self.records.update(&record)?;
                info!(backup_id = %record.id, file = %record.file_path, size, "backup run completed");
                Ok(record)
            }
            Err(e) => {
                record.fail();
                if let Err(pe) = self.records.update(&record) {
                    error!(backup_id = %record.id, error = %pe, "could not record failed backup");
                }
                error!(backup_id = %record.id, error = %e, "backup run failed");
                Err(e)
            }
        }
    }

    /// Restore backup `backup_id` into its own datasource, or into
    /// `target_datasource_id` when given, then stamp `restored_at`.
    #[instrument(skip(self))]
    pub async fn restore(
        &self,
        backup_id: &str,
        target_datasource_id: Option<&str>,
    ) -> CommandResult<RestoreOutcome> {
        let mut record = self.records.get(backup_id)?;
        if record.status != BackupStatus::Completed {
            return Err(CommandError::NotRestorable {
                id: record.id,
                status: record.status,
            });
        }

        let target_id = target_datasource_id.unwrap_or(&record.datasource_id);
        let ds = self.catalog.get(target_id)?.decrypted(&self.codec)?;

        info!(datasource_id = %ds.id, file = %record.file_path, "restore started");
        let outcome = self
            .orchestrator
            .restore(&ds, Path::new(&record.file_path))
            .await?;
        if let Some(warning) = &outcome.warning {
            warn!(datasource_id = %ds.id, %warning, "restore completed with warnings");
        }

        record.mark_restored();
        self.records.update(&record)?;
        info!(datasource_id = %ds.id, "restore completed");
        Ok(outcome)
    }

    /// Remove the backup's file (if it still exists) and then its record.
    #[instrument(skip(self))]
    pub async fn delete_backup(&self, backup_id: &str) -> CommandResult<()> {
        let record = self.records.get(backup_id)?;
        if !record.file_path.is_empty() {
            match tokio::fs::remove_file(&record.file_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(file = %record.file_path, "backup file already gone");
                }
                Err(source) => {
                    return Err(CommandError::Filesystem {
                        path: PathBuf::from(&record.file_path),
                        source,
                    })
                }
            }
        }
        self.records.delete(backup_id)?;
        info!("backup deleted");
        Ok(())
    }

    async fn attempt(&self, ds: &Datasource) -> CommandResult<(PathBuf, u64)> {
        let ds = ds.decrypted(&self.codec)?;
        let dest = format!("{}-{}", file_stem(&ds.database), Utc::now().timestamp());
        let artifact = self.orchestrator.backup(&ds, &dest, self.format).await?;

        let meta = tokio::fs::metadata(&artifact.path)
            .await
            .map_err(|source| CommandError::Filesystem {
                path: artifact.path.clone(),
                source,
            })?;
        Ok((artifact.path, meta.len()))
    }
}

#[async_trait]
impl JobCommand for ExecutionCommand {
    async fn execute(&self, datasource: Datasource, trigger: BackupTrigger) {
        // Outcome lives in the record store; run() already logged it.
        let _ = self.run(&datasource, trigger).await;
    }
}

/// Database names may contain path separators; keep the dump in one file.
fn file_stem(database: &str) -> String {
    database
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}
