//! Process Runner: the single seam through which pg_dump, pg_restore and
//! psql are executed.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{BackupError, Result};
use crate::types::{Invocation, ProcessOutput};

/// Runs one external program to completion.
///
/// Implementations must kill the child when the returned future is dropped,
/// so callers can cancel by dropping and the timeout can enforce itself.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput>;
}

/// `tokio::process` implementation.
///
/// The child inherits the parent environment plus `invocation.env`, gets a
/// closed stdin (so psql never waits on a terminal), and has both output
/// pipes captured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, inv: &Invocation) -> Result<ProcessOutput> {
        debug!(program = %inv.program, args = ?inv.args, "spawning");

        let child = Command::new(&inv.program)
            .args(&inv.args)
            .envs(inv.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackupError::Spawn {
                program: inv.program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(inv.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&out.stderr));
                Ok(ProcessOutput {
                    exit_code: out.status.code(),
                    output: combined,
                })
            }
            Ok(Err(source)) => Err(BackupError::Spawn {
                program: inv.program.clone(),
                source,
            }),
            Err(_elapsed) => Err(BackupError::Timeout {
                program: inv.program.clone(),
                secs: inv.timeout.as_secs(),
            }),
        }
    }
}
