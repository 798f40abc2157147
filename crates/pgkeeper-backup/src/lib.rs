//! `pgkeeper-backup`: runs the PostgreSQL client tools to dump and restore
//! databases.
//!
//! Layers, bottom up:
//! - [`ProcessRunner`]: spawns one program with env, timeout and captured output
//! - [`compression`]: gzip on the blocking pool
//! - [`PostgresOrchestrator`]: pg_dump / pg_restore / psql, outcome classification
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pgkeeper_backup::{BackupOrchestrator, PostgresOrchestrator, TokioProcessRunner};
//! use pgkeeper_core::{Datasource, DumpFormat, ScheduleSpec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let orch = PostgresOrchestrator::new(
//!         Arc::new(TokioProcessRunner),
//!         "./backups",
//!         Duration::from_secs(900),
//!     )
//!     .unwrap();
//!     let ds = Datasource::new("localhost", 5432, "app", "postgres", "secret", "disable",
//!         ScheduleSpec::default());
//!     let artifact = orch.backup(&ds, "app-manual", DumpFormat::Plain).await.unwrap();
//!     println!("{}", artifact.path.display());
//! }
//! ```

pub mod compression;
pub mod error;
pub mod orchestrator;
pub mod runner;
pub mod truncate;
pub mod types;

pub use error::{BackupError, Result};
pub use orchestrator::{BackupOrchestrator, PostgresOrchestrator, CLEAR_SCHEMAS_SQL};
pub use runner::{ProcessRunner, TokioProcessRunner};
pub use types::{BackupArtifact, Invocation, ProcessOutput, RestoreMode, RestoreOutcome};
