//! Error types for the pgkeeper-backup crate.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while dumping or restoring a database.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The pre-flight `psql` probe did not succeed.
    #[error("connectivity check failed: {output}")]
    Connectivity { output: String },

    /// An external tool failed: non-zero exit, or (for restores) output
    /// containing `ERROR`.
    #[error("{program} failed ({reason})\n{output}")]
    ProcessExecution {
        program: String,
        reason: String,
        output: String,
    },

    /// The dump exists uncompressed at `path`; only the gzip step failed.
    #[error("backup succeeded but compression failed for {}: {source}", path.display())]
    Compression {
        path: PathBuf,
        output: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decompress {}: {source}", path.display())]
    Decompression {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required file is missing or unreadable.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Restore input is not one of `.sql`, `.sql.gz`, `.backup`, `.backup.gz`.
    #[error("unsupported backup file extension: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// The executable could not be started (or waited on).
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its time budget and was killed.
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, BackupError>;
