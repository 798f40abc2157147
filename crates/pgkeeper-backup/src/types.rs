//! Shared data types for pgkeeper-backup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pgkeeper_core::DumpFormat;

// ---------------------------------------------------------------------------
// Invocation / ProcessOutput
// ---------------------------------------------------------------------------

/// One external tool invocation: what to run, with which extra environment,
/// and for how long at most.
#[derive(Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment. Carries credentials, so it
    /// is never printed.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// What a finished process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// stdout followed by stderr, lossily decoded.
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Human-readable exit description for error messages.
    pub fn exit_description(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// RestoreMode
// ---------------------------------------------------------------------------

/// How a backup file is fed back into the database, sniffed from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// `.sql`: psql script.
    Plain,
    /// `.sql.gz`
    PlainGzip,
    /// `.backup`: pg_restore archive.
    Custom,
    /// `.backup.gz`
    CustomGzip,
}

impl RestoreMode {
    /// Sniff the mode from `path`'s file name. `None` for anything else.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(".sql.gz") {
            Some(RestoreMode::PlainGzip)
        } else if name.ends_with(".sql") {
            Some(RestoreMode::Plain)
        } else if name.ends_with(".backup.gz") {
            Some(RestoreMode::CustomGzip)
        } else if name.ends_with(".backup") {
            Some(RestoreMode::Custom)
        } else {
            None
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, RestoreMode::PlainGzip | RestoreMode::CustomGzip)
    }

    pub fn format(self) -> DumpFormat {
        match self {
            RestoreMode::Plain | RestoreMode::PlainGzip => DumpFormat::Plain,
            RestoreMode::Custom | RestoreMode::CustomGzip => DumpFormat::Custom,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A finished, compressed dump.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    /// Combined pg_dump output.
    pub output: String,
    /// The final `.sql.gz` / `.backup.gz` file.
    pub path: PathBuf,
}

/// A restore that did not hard-fail.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub output: String,
    /// Set when the tool reported a failure but its output had no `ERROR`
    /// line; the restore is treated as successful with this warning.
    pub warning: Option<String>,
}
