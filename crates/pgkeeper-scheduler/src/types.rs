use async_trait::async_trait;
use pgkeeper_core::{BackupTrigger, Datasource};
use serde::Serialize;

use crate::timer::EntryId;

/// What a timer entry runs when it fires.
///
/// Implementations own their failure handling: nothing is returned to the
/// scheduler, and a failed run must not affect other entries.
#[async_trait]
pub trait JobCommand: Send + Sync {
    async fn execute(&self, datasource: Datasource, trigger: BackupTrigger);
}

/// The live timer registered for one datasource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub datasource_id: String,
    pub entry_id: EntryId,
    /// Expression the timer was registered with, compared on every pass.
    pub expression: String,
}

/// Outcome counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: usize,
    pub replaced: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Datasources whose timer could not be registered this pass.
    pub failed: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.added + self.replaced + self.removed > 0
    }
}
