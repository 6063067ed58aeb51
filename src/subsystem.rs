//! Subsystem bootstrap and the operations offered to the application
//!
//! [`Resilience`] wires the connection manager, the tool detector, the
//! backup and restore engines, the integrity monitor, retention and the
//! backup schedule together. The enclosing application only ever talks to
//! this type.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backup::{BackupEngine, BackupError, BackupSchedule, ExportOutcome};
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::integrity::{FileIncidentLog, IncidentLog, IntegrityError, IntegrityMonitor};
use crate::restore::{ImportOutcome, RestoreEngine, RestoreError};
use crate::retention::{CleanReport, RetentionManager};
use crate::store::{Record, RecordStore, StoreConnector, StoreError, StoreResult};
use crate::tools::{ToolDetector, ToolRunner};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result type for bootstrap
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Startup failures. After startup, connectivity loss is never fatal.
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    #[error("Initial connection failed: {0}")]
    Connect(StoreError),

    #[error("Incident log unavailable: {0}")]
    IncidentLog(IntegrityError),

    #[error("Backup schedule rejected: {0}")]
    Schedule(BackupError),
}

impl BootstrapError {
    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            BootstrapError::Connect(_) => "PV_BOOTSTRAP_CONNECT",
            BootstrapError::IncidentLog(_) => "PV_BOOTSTRAP_INCIDENT_LOG",
            BootstrapError::Schedule(_) => "PV_BOOTSTRAP_SCHEDULE",
        }
    }
}

/// The running persistence-resilience subsystem.
pub struct Resilience<C: StoreConnector> {
    config: Config,
    manager: Arc<ConnectionManager<C>>,
    tools: Arc<ToolDetector>,
    backup: Arc<BackupEngine<C>>,
    restore: Arc<RestoreEngine<C>>,
    retention: RetentionManager,
    integrity: Arc<IntegrityMonitor<C>>,
    schedule: Mutex<Option<JoinHandle<()>>>,
}

impl<C: StoreConnector> Resilience<C> {
    /// Build every component without touching the store.
    pub fn assemble(config: Config, connector: C, log: Arc<dyn IncidentLog>) -> Self {
        let manager = ConnectionManager::new(connector, config.connection.settings());

        let tools = Arc::new(if config.backups.use_native_tools {
            ToolDetector::new(
                vec![
                    config.backups.dump_binary.clone(),
                    config.backups.restore_binary.clone(),
                ],
                config.backups.tool_probe_timeout(),
            )
        } else {
            ToolDetector::with_known(false)
        });
        let runner = ToolRunner::from_config(&config.database, &config.backups);
        let layout = config.database.layout();

        let backup = Arc::new(BackupEngine::new(
            Arc::clone(&manager),
            Arc::clone(&tools),
            runner.clone(),
            layout.clone(),
            config.backups.dir.clone(),
        ));
        let restore = Arc::new(RestoreEngine::new(
            Arc::clone(&manager),
            Arc::clone(&tools),
            runner,
            layout,
        ));
        let integrity = IntegrityMonitor::new(
            Arc::clone(&manager),
            Arc::clone(&restore),
            config.backups.dir.clone(),
            log,
            config.integrity.thresholds(),
            config.integrity.interval(),
        );
        let retention = RetentionManager::new(config.backups.dir.clone());

        Self {
            config,
            manager,
            tools,
            backup,
            restore,
            retention,
            integrity,
            schedule: Mutex::new(None),
        }
    }

    /// Connect and start every background loop.
    ///
    /// The initial connection is the only fatal failure; an integrity monitor
    /// that refuses to start is logged and left stopped.
    pub async fn bootstrap(config: Config, connector: C) -> BootstrapResult<Self> {
        let log = FileIncidentLog::open(config.backups.incident_log_path())
            .map_err(BootstrapError::IncidentLog)?;
        let subsystem = Self::assemble(config, connector, Arc::new(log));
        subsystem.start().await?;
        Ok(subsystem)
    }

    /// Connect, then start the health monitor, integrity monitor and
    /// backup schedule. A failed initial connection cancels the retry loop
    /// it armed and is returned.
    pub async fn start(&self) -> BootstrapResult<()> {
        if let Err(e) = self.manager.connect().await {
            self.manager.stop_reconnect();
            return Err(BootstrapError::Connect(e));
        }
        self.manager.start_health_monitor();

        if let Err(e) = self.integrity.start().await {
            warn!(code = e.code(), error = %e, "integrity monitor not started");
        }

        if let Some(pattern) = &self.config.backups.schedule {
            let schedule = BackupSchedule::parse(pattern).map_err(BootstrapError::Schedule)?;
            let handle = schedule.spawn(
                Arc::clone(&self.backup),
                self.retention.clone(),
                self.config.backups.keep,
            );
            if let Some(previous) = lock(&self.schedule).replace(handle) {
                previous.abort();
            }
        }

        info!(target = %self.manager.connector().describe(), "resilience subsystem started");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    pub fn tools(&self) -> &Arc<ToolDetector> {
        &self.tools
    }

    pub fn backup(&self) -> &Arc<BackupEngine<C>> {
        &self.backup
    }

    pub fn integrity(&self) -> &Arc<IntegrityMonitor<C>> {
        &self.integrity
    }

    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    /// Run one store operation against the current handle, feeding
    /// connectivity errors to the manager.
    async fn with_store<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(C::Store) -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        let result = match self.manager.store().await {
            Ok(store) => op(store).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.manager.report(e);
        }
        result
    }

    pub async fn add_record(&self, record: &Record) -> StoreResult<()> {
        self.with_store(|store| async move { store.add_record(record).await })
            .await
    }

    pub async fn remove_record(&self, path: &str) -> StoreResult<bool> {
        self.with_store(|store| async move { store.remove_record(path).await })
            .await
    }

    pub async fn all_records(&self) -> StoreResult<Vec<Record>> {
        self.with_store(|store| async move { store.all_records().await })
            .await
    }

    pub async fn record_count(&self) -> StoreResult<u64> {
        self.with_store(|store| async move { store.record_count().await })
            .await
    }

    pub async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_store(|store| async move { store.get_setting(key).await })
            .await
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_store(|store| async move { store.set_setting(key, value).await })
            .await
    }

    /// Never fails; see [`ConnectionManager::status`]
    pub async fn status(&self) -> ConnectionStatus {
        self.manager.status().await
    }

    pub async fn export_backup(&self, path: Option<&Path>) -> Result<ExportOutcome, BackupError> {
        self.backup.export_backup(path).await
    }

    pub async fn import_backup(&self, path: &Path) -> Result<ImportOutcome, RestoreError> {
        self.restore.import_backup(path).await
    }

    pub fn clean_backups(&self, keep: usize) -> Result<CleanReport, BackupError> {
        self.retention.clean(keep)
    }

    /// Stop every background loop and close the pool.
    pub async fn shutdown(&self) {
        if let Some(handle) = lock(&self.schedule).take() {
            handle.abort();
        }
        self.integrity.stop();
        self.manager.shutdown().await;
        info!("resilience subsystem stopped");
    }
}
