//! Periodic record-count sampling and catastrophic-loss recovery

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::errors::{IntegrityError, IntegrityResult};
use super::incident::{IncidentKind, IncidentLog, IncidentRecord};
use super::{classify, Anomaly, IntegrityThresholds};
use crate::backup::latest_restorable_artifact;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::restore::RestoreEngine;
use crate::store::{RecordStore, StoreConnector, StoreError, StoreResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Disconnected, the count query failed, or connectivity did not survive
    /// re-verification
    Skipped,
    /// Normal change; the last known count was updated
    Drift { previous: u64, current: u64 },
    /// Sharp drop; logged, nothing restored
    PartialLoss { previous: u64, current: u64 },
    Recovered {
        backup: PathBuf,
        imported: u64,
        count: u64,
    },
    RecoveryFailed { backup: PathBuf, reason: String },
    /// Total loss with no artifact to restore from
    NoBackup,
}

/// Watches the record count and restores the newest artifact that holds
/// records when the table is found empty after holding rows.
///
/// Only the most recent count is kept. A partial drop is never reverted
/// automatically: it may be a legitimate bulk deletion.
pub struct IntegrityMonitor<C: StoreConnector> {
    manager: Arc<ConnectionManager<C>>,
    restore: Arc<RestoreEngine<C>>,
    backups_dir: PathBuf,
    log: Arc<dyn IncidentLog>,
    thresholds: IntegrityThresholds,
    interval: Duration,
    last_known: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: StoreConnector> IntegrityMonitor<C> {
    pub fn new(
        manager: Arc<ConnectionManager<C>>,
        restore: Arc<RestoreEngine<C>>,
        backups_dir: impl Into<PathBuf>,
        log: Arc<dyn IncidentLog>,
        thresholds: IntegrityThresholds,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            restore,
            backups_dir: backups_dir.into(),
            log,
            thresholds,
            interval,
            last_known: AtomicU64::new(0),
            task: Mutex::new(None),
        })
    }

    pub fn last_known_count(&self) -> u64 {
        self.last_known.load(Ordering::SeqCst)
    }

    pub fn thresholds(&self) -> &IntegrityThresholds {
        &self.thresholds
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn count(&self) -> StoreResult<u64> {
        let result = async { self.manager.store().await?.record_count().await }.await;
        if let Err(e) = &result {
            self.manager.report(e);
        }
        result
    }

    /// Refresh the last known count from a live query
    pub async fn resample(&self) -> StoreResult<u64> {
        let count = self.count().await?;
        self.last_known.store(count, Ordering::SeqCst);
        debug!(count, "record count sampled");
        Ok(count)
    }

    /// Sample, then tick every interval, replacing any running loop.
    /// Refuses to start if the store is not reachable now.
    pub async fn start(self: &Arc<Self>) -> IntegrityResult<()> {
        if !self.manager.verify().await {
            let reason = self.manager.last_error().unwrap_or_else(|| "probe failed".into());
            return Err(IntegrityError::Unreachable(StoreError::Connection(reason)));
        }
        let count = self.resample().await.map_err(IntegrityError::Unreachable)?;

        let mut states = self.manager.subscribe();
        states.borrow_and_update();

        let mut slot = lock(&self.task);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(Self::run(Arc::downgrade(self), self.interval, states)));
        info!(count, interval_secs = self.interval.as_secs(), "integrity monitor started");
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }

    async fn run(
        monitor: Weak<Self>,
        interval: Duration,
        mut states: watch::Receiver<ConnectionState>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(monitor) = monitor.upgrade() else { return };
                    monitor.tick().await;
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let restored = *states.borrow_and_update() == ConnectionState::Connected;
                    let Some(monitor) = monitor.upgrade() else { return };
                    if restored {
                        match monitor.resample().await {
                            Ok(count) => info!(count, "connectivity restored; count resampled"),
                            Err(e) => warn!(error = %e, "resample after reconnect failed"),
                        }
                    }
                }
            }
        }
    }

    /// One monitoring cycle
    pub async fn tick(&self) -> TickOutcome {
        if !self.manager.is_connected() {
            debug!(state = %self.manager.state(), "integrity tick skipped");
            return TickOutcome::Skipped;
        }
        let current = match self.count().await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "integrity count failed");
                return TickOutcome::Skipped;
            }
        };
        let previous = self.last_known_count();

        match classify(previous, current, &self.thresholds) {
            Anomaly::Catastrophic => self.recover(previous, current).await,
            Anomaly::PartialLoss => {
                warn!(previous, current, "record count dropped sharply; not restoring");
                self.record(IncidentRecord::new(IncidentKind::PartialLoss, previous, current))
                    .await;
                TickOutcome::PartialLoss { previous, current }
            }
            Anomaly::None => {
                self.last_known.store(current, Ordering::SeqCst);
                TickOutcome::Drift { previous, current }
            }
        }
    }

    async fn recover(&self, previous: u64, current: u64) -> TickOutcome {
        error!(previous, current, "all records lost; verifying connectivity before recovery");
        if !self.manager.verify().await {
            warn!("connectivity lost during verification; recovery postponed");
            return TickOutcome::Skipped;
        }

        let backup = match latest_restorable_artifact(&self.backups_dir) {
            Ok(Some(artifact)) => artifact.path,
            Ok(None) => {
                error!(dir = %self.backups_dir.display(), "no backup available for recovery");
                self.record(IncidentRecord::new(IncidentKind::NoBackup, previous, current))
                    .await;
                return TickOutcome::NoBackup;
            }
            Err(e) => {
                error!(error = %e, "could not list backups for recovery");
                self.record(
                    IncidentRecord::new(IncidentKind::NoBackup, previous, current)
                        .with_error(e.to_string()),
                )
                .await;
                return TickOutcome::NoBackup;
            }
        };

        self.record(
            IncidentRecord::new(IncidentKind::RecoveryStarted, previous, current)
                .with_backup(&backup),
        )
        .await;

        match self.restore.import_backup(&backup).await {
            Ok(outcome) => {
                let count = match self.resample().await {
                    Ok(count) => count,
                    Err(_) => {
                        let estimate = current + outcome.imported;
                        self.last_known.store(estimate, Ordering::SeqCst);
                        estimate
                    }
                };
                info!(
                    backup = %backup.display(),
                    imported = outcome.imported,
                    errors = outcome.errors,
                    count,
                    "automatic recovery complete"
                );
                self.record(
                    IncidentRecord::new(IncidentKind::RecoveryCompleted, previous, count)
                        .with_backup(&backup),
                )
                .await;
                TickOutcome::Recovered {
                    backup,
                    imported: outcome.imported,
                    count,
                }
            }
            Err(e) => {
                error!(
                    backup = %backup.display(),
                    code = e.code(),
                    error = %e,
                    "automatic recovery failed"
                );
                self.record(
                    IncidentRecord::new(IncidentKind::RecoveryFailed, previous, current)
                        .with_backup(&backup)
                        .with_error(e.to_string()),
                )
                .await;
                TickOutcome::RecoveryFailed {
                    backup,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Append on the blocking pool; file logs fsync every record.
    async fn record(&self, incident: IncidentRecord) {
        let log = Arc::clone(&self.log);
        let kind = incident.kind;
        let result = tokio::task::spawn_blocking(move || log.append(&incident)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%kind, error = %e, "failed to write incident"),
            Err(e) => warn!(%kind, error = %e, "incident writer panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, DatabaseConfig};
    use crate::connection::ConnectionSettings;
    use crate::integrity::MemoryIncidentLog;
    use crate::store::{MemoryConnector, Record, TableLayout};
    use crate::tools::{ToolDetector, ToolRunner};
    use tempfile::TempDir;

    struct Fixture {
        monitor: Arc<IntegrityMonitor<MemoryConnector>>,
        connector: MemoryConnector,
        log: MemoryIncidentLog,
        dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let connector = MemoryConnector::new(TableLayout::default(), &["id", "path"]);
        let manager = ConnectionManager::new(connector.clone(), ConnectionSettings::default());
        manager.connect().await.unwrap();
        let restore = Arc::new(RestoreEngine::new(
            Arc::clone(&manager),
            Arc::new(ToolDetector::with_known(false)),
            ToolRunner::from_config(&DatabaseConfig::default(), &BackupConfig::default()),
            TableLayout::default(),
        ));
        let dir = TempDir::new().unwrap();
        let log = MemoryIncidentLog::new();
        let monitor = IntegrityMonitor::new(
            manager,
            restore,
            dir.path(),
            Arc::new(log.clone()),
            IntegrityThresholds::default(),
            Duration::from_secs(1800),
        );
        Fixture {
            monitor,
            connector,
            log,
            dir,
        }
    }

    async fn add(connector: &MemoryConnector, n: usize) {
        let store = connector.store();
        for i in 0..n {
            store
                .add_record(&Record::new().with("path", format!("img-{}.png", i)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_drift_updates_count() {
        let f = fixture().await;
        add(&f.connector, 3).await;
        assert_eq!(
            f.monitor.tick().await,
            TickOutcome::Drift {
                previous: 0,
                current: 3
            }
        );
        assert_eq!(f.monitor.last_known_count(), 3);
    }

    #[tokio::test]
    async fn test_total_loss_without_backup() {
        let f = fixture().await;
        add(&f.connector, 5).await;
        f.monitor.resample().await.unwrap();
        f.connector.wipe();

        assert_eq!(f.monitor.tick().await, TickOutcome::NoBackup);
        assert_eq!(f.log.kinds(), vec![IncidentKind::NoBackup]);
        assert_eq!(f.monitor.last_known_count(), 5);
    }

    #[tokio::test]
    async fn test_total_loss_restores_newest_backup() {
        let f = fixture().await;
        std::fs::write(
            f.dir.path().join("backup-20260101-000000-000.sql"),
            "INSERT INTO images (path) VALUES ('old.png');\n",
        )
        .unwrap();
        std::fs::write(
            f.dir.path().join("backup-20260102-000000-000.sql"),
            concat!(
                "INSERT INTO images (path) VALUES ('a.png');\n",
                "INSERT INTO images (path) VALUES ('b.png');\n",
            ),
        )
        .unwrap();
        add(&f.connector, 2).await;
        f.monitor.resample().await.unwrap();
        f.connector.wipe();

        match f.monitor.tick().await {
            TickOutcome::Recovered {
                backup,
                imported,
                count,
            } => {
                assert!(backup.ends_with("backup-20260102-000000-000.sql"));
                assert_eq!(imported, 2);
                assert_eq!(count, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            f.log.kinds(),
            vec![IncidentKind::RecoveryStarted, IncidentKind::RecoveryCompleted]
        );
        assert_eq!(f.monitor.last_known_count(), 2);
    }

    #[tokio::test]
    async fn test_recovery_skips_empty_artifacts() {
        let f = fixture().await;
        std::fs::write(
            f.dir.path().join("backup-20260101-000000-000.sql"),
            "-- Records: 1\nINSERT INTO images (path) VALUES ('kept.png');\n",
        )
        .unwrap();
        std::fs::write(
            f.dir.path().join("backup-20260102-000000-000.sql"),
            "-- Records: 0\n-- DELETE FROM images;\n",
        )
        .unwrap();
        add(&f.connector, 1).await;
        f.monitor.resample().await.unwrap();
        f.connector.wipe();

        match f.monitor.tick().await {
            TickOutcome::Recovered { backup, imported, .. } => {
                assert!(backup.ends_with("backup-20260101-000000-000.sql"));
                assert_eq!(imported, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(f.monitor.last_known_count(), 1);
    }

    #[tokio::test]
    async fn test_only_empty_artifacts_is_no_backup() {
        let f = fixture().await;
        std::fs::write(
            f.dir.path().join("backup-20260102-000000-000.sql"),
            "-- Records: 0\n",
        )
        .unwrap();
        add(&f.connector, 3).await;
        f.monitor.resample().await.unwrap();
        f.connector.wipe();

        assert_eq!(f.monitor.tick().await, TickOutcome::NoBackup);
        assert_eq!(f.monitor.last_known_count(), 3);
    }

    /// Records the thread each append ran on.
    struct ThreadLog(Arc<Mutex<Vec<std::thread::ThreadId>>>);

    impl IncidentLog for ThreadLog {
        fn append(&self, _incident: &IncidentRecord) -> IntegrityResult<()> {
            lock(&self.0).push(std::thread::current().id());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_incidents_written_off_the_runtime_thread() {
        let f = fixture().await;
        let threads = Arc::new(Mutex::new(Vec::new()));
        let monitor = IntegrityMonitor::new(
            Arc::clone(&f.monitor.manager),
            Arc::clone(&f.monitor.restore),
            f.dir.path(),
            Arc::new(ThreadLog(Arc::clone(&threads))),
            IntegrityThresholds::default(),
            Duration::from_secs(1800),
        );
        add(&f.connector, 5).await;
        monitor.resample().await.unwrap();
        f.connector.wipe();

        assert_eq!(monitor.tick().await, TickOutcome::NoBackup);
        let threads = lock(&threads);
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn test_tick_skipped_when_disconnected() {
        let f = fixture().await;
        f.connector.set_online(false);
        assert_eq!(f.monitor.tick().await, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_start_refuses_unreachable_store() {
        let f = fixture().await;
        f.connector.set_online(false);
        let err = f.monitor.start().await.unwrap_err();
        assert_eq!(err.code(), "PV_INTEGRITY_UNREACHABLE");
        assert!(!f.monitor.is_running());
    }

    #[tokio::test]
    async fn test_start_samples_count() {
        let f = fixture().await;
        add(&f.connector, 4).await;
        f.monitor.start().await.unwrap();
        assert_eq!(f.monitor.last_known_count(), 4);
        assert!(f.monitor.is_running());
        f.monitor.stop();
        assert!(!f.monitor.is_running());
    }
}
