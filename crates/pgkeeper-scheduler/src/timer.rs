//! Cron timer engine: one tokio task per registered entry.
//!
//! Entries cannot be rescheduled in place; callers remove and re-add. Each
//! firing runs the job on its own task and waits for it, so a long job holds
//! its entry until it finishes and later ticks that fell inside the run are
//! skipped. Removing an entry (or dropping the timer) never cancels a job
//! that is already running.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::schedule::CronSchedule;

/// The callback a timer entry invokes on every tick.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle to one registered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct CronTimer {
    entries: Mutex<HashMap<EntryId, JoinHandle<()>>>,
    next_id: AtomicU64,
    running: watch::Sender<bool>,
}

impl CronTimer {
    /// A stopped timer with no entries.
    pub fn new() -> Self {
        let (running, _) = watch::channel(false);
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            running,
        }
    }

    /// Register `job` under `expression`. Must be called inside a tokio
    /// runtime. Entries added while stopped stay idle until [`start`].
    ///
    /// [`start`]: CronTimer::start
    pub fn add(&self, expression: &str, job: JobFn) -> Result<EntryId> {
        let schedule = CronSchedule::parse(expression)?;
        let id = EntryId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = tokio::spawn(drive(id, schedule, job, self.running.subscribe()));
        self.lock_entries().insert(id, handle);
        debug!(entry_id = %id, %expression, "timer entry added");
        Ok(id)
    }

    /// Drop the entry's schedule. Returns `false` for unknown ids.
    pub fn remove(&self, id: EntryId) -> bool {
        match self.lock_entries().remove(&id) {
            Some(handle) => {
                handle.abort();
                debug!(entry_id = %id, "timer entry removed");
                true
            }
            None => false,
        }
    }

    pub fn start(&self) {
        self.running.send_replace(true);
    }

    /// Stop firing. Entries stay registered and resume on the next `start`.
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<EntryId, JoinHandle<()>>> {
        // The map holds no invariant a panicking holder could break.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CronTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CronTimer {
    fn drop(&mut self) {
        for (_, handle) in self.lock_entries().drain() {
            handle.abort();
        }
    }
}

async fn drive(id: EntryId, schedule: CronSchedule, job: JobFn, mut running: watch::Receiver<bool>) {
    let mut last_fire = None;
    loop {
        if !*running.borrow_and_update() {
            if running.changed().await.is_err() {
                return;
            }
            continue;
        }

        let now = Utc::now();
        let from = match last_fire {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        let Some(next) = schedule.next_after(from) else {
            debug!(entry_id = %id, "schedule exhausted");
            return;
        };
        let delay = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = running.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
        }

        last_fire = Some(next);
        if !*running.borrow() {
            continue;
        }
        // Spawned separately so aborting this task leaves the job running.
        if let Err(e) = tokio::spawn(job()).await {
            warn!(entry_id = %id, error = %e, "scheduled job panicked");
        }
    }
}
