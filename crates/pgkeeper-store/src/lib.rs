//! `pgkeeper-store`: SQLite persistence for datasources and backup records.
//!
//! The scheduler and execution command only see the [`DatasourceCatalog`]
//! and [`BackupRecordStore`] traits; the SQLite types add the management
//! operations the CLI needs.

pub mod catalog;
pub mod db;
pub mod error;
pub mod records;

pub use catalog::{DatasourceCatalog, SqliteCatalog};
pub use error::{Result, StoreError};
pub use records::{BackupRecordStore, SqliteBackupStore};
