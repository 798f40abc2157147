use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::crypto::CredentialCodec;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Datasource
// ---------------------------------------------------------------------------

/// When and whether a datasource is backed up automatically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Cron expression with a leading seconds field, e.g. `0 0 3 * * *`.
    pub expression: String,
    pub description: String,
    pub enabled: bool,
}

/// A PostgreSQL database registered for backup.
///
/// `password` holds the encrypted form while the record is at rest; call
/// [`Datasource::decrypted`] right before handing it to the toolchain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datasource {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Never serialized; reads back as empty.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub ssl_mode: String,
    pub schedule: ScheduleSpec,
}

impl Datasource {
    /// Build a new datasource with a fresh UUIDv4 identity. The password is
    /// stored as given; encrypt it with [`Datasource::encrypted`] before
    /// persisting.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        ssl_mode: impl Into<String>,
        schedule: ScheduleSpec,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            ssl_mode: ssl_mode.into(),
            schedule,
        }
    }

    /// Copy of this datasource with the password decrypted.
    pub fn decrypted(&self, codec: &CredentialCodec) -> Result<Self> {
        let password = codec.decrypt(&self.password)?;
        Ok(Self {
            password,
            ..self.clone()
        })
    }

    /// Copy of this datasource with the password encrypted for storage.
    pub fn encrypted(&self, codec: &CredentialCodec) -> Result<Self> {
        let password = codec.encrypt(&self.password)?;
        Ok(Self {
            password,
            ..self.clone()
        })
    }
}

impl fmt::Debug for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datasource")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .field("schedule", &self.schedule)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Backup records
// ---------------------------------------------------------------------------

/// What caused a backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupTrigger {
    Manual,
    Scheduled,
}

impl fmt::Display for BackupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupTrigger::Manual => "manual",
            BackupTrigger::Scheduled => "scheduled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BackupTrigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(BackupTrigger::Manual),
            // older databases stored scheduled runs as "cron"
            "scheduled" | "cron" => Ok(BackupTrigger::Scheduled),
            other => Err(format!("unknown backup trigger: {other}")),
        }
    }
}

/// Lifecycle of a backup run. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Initialized,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BackupStatus::Initialized)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupStatus::Initialized => "initialized",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for BackupStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(BackupStatus::Initialized),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(format!("unknown backup status: {other}")),
        }
    }
}

/// Persisted metadata for one backup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// UUIDv4 string, new for every run.
    pub id: String,
    pub datasource_id: String,
    pub trigger: BackupTrigger,
    pub status: BackupStatus,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set by a later, independent restore of this backup.
    pub restored_at: Option<DateTime<Utc>>,
}

impl BackupRecord {
    /// A fresh `initialized` record with `started_at` set to now.
    pub fn begin(datasource_id: impl Into<String>, trigger: BackupTrigger) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            datasource_id: datasource_id.into(),
            trigger,
            status: BackupStatus::Initialized,
            file_path: String::new(),
            file_name: String::new(),
            file_size: 0,
            started_at: Some(Utc::now()),
            finished_at: None,
            restored_at: None,
        }
    }

    /// Transition to `failed`. No-op once the record is terminal.
    pub fn fail(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = BackupStatus::Failed;
        self.finished_at.get_or_insert_with(Utc::now);
    }

    /// Transition to `completed` with the produced file's details.
    /// No-op once the record is terminal.
    pub fn complete(&mut self, file_path: impl Into<String>, file_name: impl Into<String>, size: u64) {
        if self.status.is_terminal() {
            return;
        }
        self.status = BackupStatus::Completed;
        self.file_path = file_path.into();
        self.file_name = file_name.into();
        self.file_size = size;
        self.finished_at.get_or_insert_with(Utc::now);
    }

    pub fn mark_restored(&mut self) {
        self.restored_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// DumpFormat
// ---------------------------------------------------------------------------

/// pg_dump output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpFormat {
    /// SQL script, restored with psql.
    #[default]
    Plain,
    /// PostgreSQL custom archive, restored with pg_restore.
    Custom,
}

impl DumpFormat {
    /// Value for pg_dump's `-F` flag.
    pub fn pg_flag(self) -> &'static str {
        match self {
            DumpFormat::Plain => "p",
            DumpFormat::Custom => "c",
        }
    }

    /// Extension of the uncompressed dump.
    pub fn extension(self) -> &'static str {
        match self {
            DumpFormat::Plain => ".sql",
            DumpFormat::Custom => ".backup",
        }
    }
}

impl fmt::Display for DumpFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DumpFormat::Plain => "plain",
            DumpFormat::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DumpFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plain" | "p" => Ok(DumpFormat::Plain),
            "custom" | "c" => Ok(DumpFormat::Custom),
            other => Err(format!("unknown dump format: {other}")),
        }
    }
}
