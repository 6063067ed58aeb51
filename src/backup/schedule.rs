//! Cron-driven periodic backups

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use croner::Cron;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::errors::{BackupError, BackupResult};
use super::{latest_restorable_artifact, BackupEngine};
use crate::retention::RetentionManager;
use crate::store::{RecordStore, StoreConnector};

/// Export then prune, on a cron schedule (UTC).
pub struct BackupSchedule {
    pattern: String,
    cron: Cron,
}

impl BackupSchedule {
    pub fn parse(pattern: &str) -> BackupResult<Self> {
        let cron = Cron::new(pattern)
            .parse()
            .map_err(|e| BackupError::Schedule {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            pattern: pattern.to_string(),
            cron,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// First run strictly after `from`
    pub fn next_after(&self, from: DateTime<Utc>) -> BackupResult<DateTime<Utc>> {
        self.cron
            .find_next_occurrence(&from, false)
            .map_err(|e| BackupError::Schedule {
                pattern: self.pattern.clone(),
                reason: e.to_string(),
            })
    }

    /// Spawn the schedule loop. Stops when the schedule has no further
    /// occurrence; abort the handle to stop it earlier.
    pub fn spawn<C: StoreConnector>(
        self,
        engine: Arc<BackupEngine<C>>,
        retention: RetentionManager,
        keep: usize,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(schedule = %self.pattern, "backup schedule started");
            loop {
                let now = Utc::now();
                let next = match self.next_after(now) {
                    Ok(next) => next,
                    Err(e) => {
                        error!(error = %e, "backup schedule stopped");
                        return;
                    }
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                run_scheduled(&engine, &retention, keep).await;
            }
        })
    }
}

/// One scheduled run: export, then retention. Returns whether an artifact
/// was written.
///
/// An empty table is not exported while a restorable artifact exists: the
/// empty artifact would become the newest, and retention would eventually
/// delete the backups an automatic recovery needs.
pub async fn run_scheduled<C: StoreConnector>(
    engine: &BackupEngine<C>,
    retention: &RetentionManager,
    keep: usize,
) -> bool {
    if !engine.manager().is_connected() {
        warn!(state = %engine.manager().state(), "skipping scheduled backup while disconnected");
        return false;
    }
    if would_shadow_restorable(engine).await {
        warn!(dir = %engine.dir().display(), "table is empty; keeping existing backups");
        return false;
    }

    match engine.export_backup(None).await {
        Ok(outcome) => {
            if let Err(e) = retention.clean(keep) {
                warn!(error = %e, "retention after scheduled backup failed");
            }
            info!(path = %outcome.path.display(), "scheduled backup complete");
            true
        }
        Err(e) => {
            error!(code = e.code(), error = %e, "scheduled backup failed");
            false
        }
    }
}

async fn would_shadow_restorable<C: StoreConnector>(engine: &BackupEngine<C>) -> bool {
    let count = match engine.manager().store().await {
        Ok(store) => store.record_count().await,
        Err(e) => Err(e),
    };
    if !matches!(count, Ok(0)) {
        return false;
    }
    matches!(latest_restorable_artifact(engine.dir()), Ok(Some(_)))
}
