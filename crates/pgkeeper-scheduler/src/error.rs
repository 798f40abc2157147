use std::path::PathBuf;

use pgkeeper_backup::BackupError;
use pgkeeper_core::{BackupStatus, CoreError};
use pgkeeper_store::StoreError;
use thiserror::Error;

/// Errors raised while keeping timers in line with the catalog.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron expression could not be parsed.
    #[error("Invalid schedule {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// Reading enabled datasources failed; the reconciliation pass was
    /// abandoned with existing entries untouched.
    #[error("Catalog error: {0}")]
    Catalog(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why one backup, restore, or delete run did not go through.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("credential decode failed: {0}")]
    CredentialDecode(#[from] CoreError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    /// The orchestrator reported success but the artifact is not on disk,
    /// or a file could not be removed.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Only completed backups carry a file that can be restored.
    #[error("backup {id} is {status}, not restorable")]
    NotRestorable { id: String, status: BackupStatus },
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;
