//! Detached task registry for manual backups and restores.
//!
//! The caller gets a [`TaskId`] back immediately and polls
//! [`TaskRegistry::status`] for the outcome.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Backup,
    Restore,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskKind::Backup => "backup",
            TaskKind::Restore => "restore",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

/// Snapshot of a detached task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub kind: TaskKind,
    /// What the task acts on: a datasource id for backups, a backup id for
    /// restores.
    pub subject: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when `status` is `Failed`.
    pub error: Option<String>,
}

/// Tracks every task spawned through it for the life of the process.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<TaskId, TaskInfo>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` on the runtime and return its id without waiting.
    pub fn spawn<F, T, E>(&self, kind: TaskKind, subject: impl Into<String>, work: F) -> TaskId
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let id = TaskId::new();
        let info = TaskInfo {
            id: id.clone(),
            kind,
            subject: subject.into(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        info!(task_id = %id, %kind, subject = %info.subject, "task started");
        self.lock().insert(id.clone(), info);

        let tasks = Arc::clone(&self.tasks);
        let task_id = id.clone();
        tokio::spawn(async move {
            let outcome = work.await;
            let mut tasks = tasks.lock().unwrap_or_else(|e| e.into_inner());
            let Some(info) = tasks.get_mut(&task_id) else {
                return;
            };
            info.finished_at = Some(Utc::now());
            match outcome {
                Ok(_) => {
                    info.status = TaskStatus::Completed;
                    info!(task_id = %task_id, "task completed");
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(task_id = %task_id, error = %message, "task failed");
                    info.status = TaskStatus::Failed;
                    info.error = Some(message);
                }
            }
        });
        id
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskInfo> {
        self.lock().get(id).cloned()
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut all: Vec<TaskInfo> = self.lock().values().cloned().collect();
        all.sort_by_key(|t| t.started_at);
        all
    }

    /// Forget finished tasks; running ones are kept. Returns how many were
    /// dropped.
    pub fn prune_finished(&self) -> usize {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|_, t| t.status == TaskStatus::Running);
        before - tasks.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskInfo>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
