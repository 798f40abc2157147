//! `pgkeeper-core`: shared domain types, configuration, and the credential
//! codec used by every other pgkeeper crate.

pub mod config;
pub mod crypto;
pub mod error;
pub mod types;

pub use config::KeeperConfig;
pub use crypto::CredentialCodec;
pub use error::{CoreError, Result};
pub use types::{BackupRecord, BackupStatus, BackupTrigger, Datasource, DumpFormat, ScheduleSpec};
