use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::DumpFormat;

pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_PROCESS_TIMEOUT_SECS: u64 = 15 * 60; // per external invocation
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;

/// Top-level config (pgkeeper.toml + PGKEEPER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Where the datasource catalog and backup records live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory receiving dump files. Created on startup if missing.
    #[serde(default = "default_backup_dir")]
    pub dir: String,
    /// Dump format used by scheduled and manual runs.
    #[serde(default)]
    pub format: DumpFormat,
    /// Timeout applied to every pg_dump / pg_restore / psql invocation.
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            format: DumpFormat::default(),
            process_timeout_secs: default_process_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the schedule is reconciled against the catalog.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Base64-encoded 32-byte AES key. Generate one with `pgkeeper keygen`.
    pub encryption_key: Option<String>,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pgkeeper/pgkeeper.db", home)
}
fn default_backup_dir() -> String {
    DEFAULT_BACKUP_DIR.to_string()
}
fn default_process_timeout_secs() -> u64 {
    DEFAULT_PROCESS_TIMEOUT_SECS
}
fn default_reconcile_interval_secs() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}

impl KeeperConfig {
    /// Load config from a TOML file with PGKEEPER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.pgkeeper/pgkeeper.toml
    ///
    /// A missing file is not an error; defaults and env vars still apply.
    /// Nested keys use a double underscore, e.g. `PGKEEPER_BACKUP__DIR`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(KeeperConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PGKEEPER_").split("__"))
    }

    /// The encryption key, or a config error naming the missing setting.
    pub fn encryption_key(&self) -> crate::error::Result<&str> {
        self.security.encryption_key.as_deref().ok_or_else(|| {
            crate::error::CoreError::Config(
                "security.encryption_key is not set (PGKEEPER_SECURITY__ENCRYPTION_KEY)"
                    .to_string(),
            )
        })
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pgkeeper/pgkeeper.toml", home)
}
