use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use pgkeeper_core::{BackupTrigger, Datasource};
use pgkeeper_store::DatasourceCatalog;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::{
    error::Result,
    timer::{CronTimer, JobFn},
    types::{JobCommand, ReconcileReport, ScheduleEntry},
};

/// Keeps exactly one cron timer per enabled datasource.
///
/// Reconciliation runs once on [`start`](Scheduler::start) and then every
/// `interval` until [`stop`](Scheduler::stop). Passes are serialised by the
/// entry-map lock, which is held for the whole pass.
pub struct Scheduler {
    catalog: Arc<dyn DatasourceCatalog>,
    command: Arc<dyn JobCommand>,
    timer: CronTimer,
    entries: Mutex<HashMap<String, ScheduleEntry>>,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    reconcile_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        catalog: Arc<dyn DatasourceCatalog>,
        command: Arc<dyn JobCommand>,
        interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            catalog,
            command,
            timer: CronTimer::new(),
            entries: Mutex::new(HashMap::new()),
            interval,
            shutdown,
            reconcile_loop: std::sync::Mutex::new(None),
        }
    }

    /// Reconcile once, start the timers, and launch the periodic loop.
    ///
    /// A failing first pass is logged; the loop retries on its next tick.
    pub async fn start(self: &Arc<Self>) {
        info!(interval_secs = self.interval.as_secs(), "scheduler starting");
        if let Err(e) = self.reconcile().await {
            error!(error = %e, "initial reconciliation failed");
        }
        self.timer.start();

        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; start() already reconciled.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = this.reconcile().await {
                            error!(error = %e, "reconciliation failed; entries left unchanged");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let previous = self.lock_loop().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("scheduler started");
    }

    /// Stop the timers and the reconciliation loop.
    ///
    /// Runs already in flight are not cancelled and finish on their own.
    pub async fn stop(&self) {
        self.timer.stop();
        self.shutdown.send_replace(true);
        let handle = self.lock_loop().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "reconciliation loop ended abnormally");
                }
            }
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Bring the schedule entries in line with the enabled datasources.
    ///
    /// A catalog error aborts the pass before any entry is touched. A
    /// datasource whose timer cannot be registered is skipped and counted
    /// in [`ReconcileReport::failed`].
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut entries = self.entries.lock().await;
        let enabled = self.catalog.list_enabled()?;

        let mut report = ReconcileReport::default();
        let mut seen = HashSet::with_capacity(enabled.len());

        for ds in enabled {
            seen.insert(ds.id.clone());
            match entries.get(&ds.id) {
                Some(entry) if entry.expression == ds.schedule.expression => {
                    report.unchanged += 1;
                    continue;
                }
                Some(entry) => {
                    let old = entry.entry_id;
                    self.timer.remove(old);
                    entries.remove(&ds.id);
                    info!(
                        datasource_id = %ds.id,
                        expression = %ds.schedule.expression,
                        "schedule changed; replacing timer"
                    );
                    match self.register(&ds) {
                        Some(entry) => {
                            entries.insert(ds.id.clone(), entry);
                            report.replaced += 1;
                        }
                        None => report.failed += 1,
                    }
                }
                None => match self.register(&ds) {
                    Some(entry) => {
                        entries.insert(ds.id.clone(), entry);
                        report.added += 1;
                    }
                    None => report.failed += 1,
                },
            }
        }

        let stale: Vec<String> = entries
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(entry) = entries.remove(&id) {
                self.timer.remove(entry.entry_id);
                info!(datasource_id = %id, "datasource disabled or removed; timer dropped");
                report.removed += 1;
            }
        }

        if report.changed() || report.failed > 0 {
            info!(
                added = report.added,
                replaced = report.replaced,
                removed = report.removed,
                failed = report.failed,
                total = entries.len(),
                "reconciliation finished"
            );
        }
        Ok(report)
    }

    /// Snapshot of the live entries, sorted by datasource id.
    pub async fn entries(&self) -> Vec<ScheduleEntry> {
        let mut out: Vec<ScheduleEntry> = self.entries.lock().await.values().cloned().collect();
        out.sort_by(|a, b| a.datasource_id.cmp(&b.datasource_id));
        out
    }

    // --- private helpers ---------------------------------------------------

    /// Register a timer firing a scheduled run of `ds` as it looks now.
    fn register(&self, ds: &Datasource) -> Option<ScheduleEntry> {
        let command = Arc::clone(&self.command);
        let snapshot = ds.clone();
        let job: JobFn = Arc::new(move || {
            let command = Arc::clone(&command);
            let ds = snapshot.clone();
            async move { command.execute(ds, BackupTrigger::Scheduled).await }.boxed()
        });

        match self.timer.add(&ds.schedule.expression, job) {
            Ok(entry_id) => {
                info!(
                    datasource_id = %ds.id,
                    expression = %ds.schedule.expression,
                    %entry_id,
                    "timer registered"
                );
                Some(ScheduleEntry {
                    datasource_id: ds.id.clone(),
                    entry_id,
                    expression: ds.schedule.expression.clone(),
                })
            }
            Err(e) => {
                warn!(datasource_id = %ds.id, error = %e, "could not register timer; skipping");
                None
            }
        }
    }

    fn lock_loop(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reconcile_loop.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn timer_len(&self) -> usize {
        self.timer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pgkeeper_core::ScheduleSpec;
    use pgkeeper_store::StoreError;
    use tokio::sync::mpsc;

    /// In-memory catalog whose contents and failure mode tests can flip.
    #[derive(Default)]
    struct FakeCatalog {
        datasources: std::sync::Mutex<Vec<Datasource>>,
        broken: std::sync::atomic::AtomicBool,
    }

    impl FakeCatalog {
        fn set(&self, list: Vec<Datasource>) {
            *self.datasources.lock().unwrap() = list;
        }
    }

    impl DatasourceCatalog for FakeCatalog {
        fn list_enabled(&self) -> pgkeeper_store::Result<Vec<Datasource>> {
            if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::Unavailable("catalog offline".into()));
            }
            Ok(self
                .datasources
                .lock()
                .unwrap()
                .iter()
                .filter(|d| d.schedule.enabled)
                .cloned()
                .collect())
        }

        fn get(&self, id: &str) -> pgkeeper_store::Result<Datasource> {
            self.datasources
                .lock()
                .unwrap()
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    kind: "datasource",
                    id: id.to_string(),
                })
        }
    }

    struct RecordingCommand(mpsc::UnboundedSender<(String, BackupTrigger)>);

    #[async_trait]
    impl JobCommand for RecordingCommand {
        async fn execute(&self, datasource: Datasource, trigger: BackupTrigger) {
            let _ = self.0.send((datasource.id, trigger));
        }
    }

    fn ds(id: &str, expression: &str, enabled: bool) -> Datasource {
        let mut d = Datasource::new(
            "localhost",
            5432,
            "app",
            "postgres",
            "cipher",
            "disable",
            ScheduleSpec {
                expression: expression.to_string(),
                description: String::new(),
                enabled,
            },
        );
        d.id = id.to_string();
        d
    }

    fn scheduler(
        interval: Duration,
    ) -> (
        Arc<Scheduler>,
        Arc<FakeCatalog>,
        mpsc::UnboundedReceiver<(String, BackupTrigger)>,
    ) {
        let catalog = Arc::new(FakeCatalog::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let sched = Arc::new(Scheduler::new(
            catalog.clone(),
            Arc::new(RecordingCommand(tx)),
            interval,
        ));
        (sched, catalog, rx)
    }

    #[tokio::test]
    async fn schedule_change_replaces_the_timer() {
        let (sched, catalog, _rx) = scheduler(Duration::from_secs(60));
        catalog.set(vec![ds("d1", "*/5 * * * * *", true)]);

        let report = sched.reconcile().await.unwrap();
        assert_eq!(report.added, 1);
        let before = sched.entries().await;
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].datasource_id, "d1");

        catalog.set(vec![ds("d1", "0 0 * * * *", true)]);
        let report = sched.reconcile().await.unwrap();
        assert_eq!(report.replaced, 1);

        let after = sched.entries().await;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].expression, "0 0 * * * *");
        assert_ne!(after[0].entry_id, before[0].entry_id);
        assert_eq!(sched.timer_len(), 1);
    }

    #[tokio::test]
    async fn unchanged_catalog_is_a_no_op() {
        let (sched, catalog, _rx) = scheduler(Duration::from_secs(60));
        catalog.set(vec![ds("a", "0 0 3 * * *", true), ds("b", "0 0 4 * * *", true)]);

        sched.reconcile().await.unwrap();
        let first = sched.entries().await;
        let report = sched.reconcile().await.unwrap();

        assert_eq!(report.unchanged, 2);
        assert!(!report.changed());
        assert_eq!(sched.entries().await, first);
    }

    #[tokio::test]
    async fn disabled_and_deleted_datasources_lose_their_entry() {
        let (sched, catalog, _rx) = scheduler(Duration::from_secs(60));
        catalog.set(vec![
            ds("keep", "0 0 3 * * *", true),
            ds("disable", "0 0 3 * * *", true),
            ds("delete", "0 0 3 * * *", true),
        ]);
        sched.reconcile().await.unwrap();
        assert_eq!(sched.timer_len(), 3);

        catalog.set(vec![ds("keep", "0 0 3 * * *", true), ds("disable", "0 0 3 * * *", false)]);
        let report = sched.reconcile().await.unwrap();

        assert_eq!(report.removed, 2);
        let ids: Vec<String> = sched.entries().await.into_iter().map(|e| e.datasource_id).collect();
        assert_eq!(ids, vec!["keep"]);
        assert_eq!(sched.timer_len(), 1);
    }

    #[tokio::test]
    async fn catalog_failure_leaves_entries_alone() {
        let (sched, catalog, _rx) = scheduler(Duration::from_secs(60));
        catalog.set(vec![ds("a", "0 0 3 * * *", true)]);
        sched.reconcile().await.unwrap();

        catalog.set(Vec::new());
        catalog.broken.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(sched.reconcile().await.is_err());
        assert_eq!(sched.entries().await.len(), 1);

        catalog.broken.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(sched.reconcile().await.unwrap().removed, 1);
    }

    #[tokio::test]
    async fn invalid_expression_skips_only_that_datasource() {
        let (sched, catalog, _rx) = scheduler(Duration::from_secs(60));
        catalog.set(vec![ds("bad", "every tuesday", true), ds("good", "0 0 3 * * *", true)]);

        let report = sched.reconcile().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.added, 1);
        let ids: Vec<String> = sched.entries().await.into_iter().map(|e| e.datasource_id).collect();
        assert_eq!(ids, vec!["good"]);
    }

    #[tokio::test]
    async fn started_scheduler_fires_scheduled_runs() {
        let (sched, catalog, mut rx) = scheduler(Duration::from_secs(60));
        catalog.set(vec![ds("d1", "* * * * * *", true)]);

        sched.start().await;
        assert!(sched.is_running());
        assert_eq!(sched.entries().await.len(), 1);

        let fired = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired, ("d1".to_string(), BackupTrigger::Scheduled));

        sched.stop().await;
        assert!(!sched.is_running());
    }

    #[tokio::test]
    async fn periodic_loop_picks_up_catalog_changes() {
        let (sched, catalog, _rx) = scheduler(Duration::from_millis(50));
        catalog.set(vec![ds("d1", "0 0 3 * * *", true)]);
        sched.start().await;
        assert_eq!(sched.entries().await.len(), 1);

        catalog.set(vec![ds("d1", "0 0 3 * * *", false), ds("d2", "0 0 4 * * *", true)]);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let ids: Vec<String> = sched.entries().await.into_iter().map(|e| e.datasource_id).collect();
        assert_eq!(ids, vec!["d2"]);

        sched.stop().await;
        catalog.set(Vec::new());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sched.entries().await.len(), 1, "no reconciliation after stop");
    }
}
