//! Restore subsystem
//!
//! Restore replays a backup artifact into the primary table.
//!
//! # Algorithm
//!
//! 1. Check the artifact exists
//! 2. Preflight: probe the current pool. A failure here is fatal and no
//!    strategy is attempted
//! 3. Native restore (`psql -v ON_ERROR_STOP=1 --single-transaction`) when
//!    the tools are installed
//! 4. Otherwise, or if the native restore failed, parse the INSERTs and
//!    replay them in one transaction
//!
//! # Important
//!
//! Restore never deletes rows unless the artifact carries an active,
//! uncommented `DELETE FROM <table>;` statement. Rows whose natural key is
//! already present are skipped, so importing the same artifact twice
//! imports nothing the second time.

mod errors;
mod plan;

pub use errors::{RestoreError, RestoreResult};
pub use plan::{plan_replay, ParsedArtifact};

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::store::{RecordStore, StoreConnector, StoreError, TableLayout};
use crate::tools::{ToolDetector, ToolRunner};

/// How an artifact was replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestoreStrategy {
    NativeRestore,
    ParsedInserts,
}

/// Row counts of a completed restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub imported: u64,
    /// Rows whose natural key already existed
    pub skipped: u64,
    /// Rows that failed to insert plus statements that failed to parse
    pub errors: u64,
    pub strategy: RestoreStrategy,
}

/// Replays backup artifacts into the store.
pub struct RestoreEngine<C: StoreConnector> {
    manager: Arc<ConnectionManager<C>>,
    tools: Arc<ToolDetector>,
    runner: ToolRunner,
    layout: TableLayout,
}

impl<C: StoreConnector> RestoreEngine<C> {
    pub fn new(
        manager: Arc<ConnectionManager<C>>,
        tools: Arc<ToolDetector>,
        runner: ToolRunner,
        layout: TableLayout,
    ) -> Self {
        Self {
            manager,
            tools,
            runner,
            layout,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    /// Import every row of the artifact at `path`.
    pub async fn import_backup(&self, path: &Path) -> RestoreResult<ImportOutcome> {
        tokio::fs::metadata(path)
            .await
            .map_err(|e| RestoreError::io_at(path, e))?;
        let store = self.preflight().await?;

        let outcome = if self.tools.detect().await {
            match self.native_import(&store, path).await {
                Ok(outcome) => outcome,
                Err(native_err) => {
                    warn!(error = %native_err, "native restore failed; replaying parsed INSERTs");
                    self.parsed_import(&store, path).await.map_err(|fallback_err| {
                        warn!(error = %fallback_err, "parsed restore failed too");
                        native_err
                    })?
                }
            }
        } else {
            self.parsed_import(&store, path).await?
        };

        info!(
            path = %path.display(),
            imported = outcome.imported,
            skipped = outcome.skipped,
            errors = outcome.errors,
            strategy = ?outcome.strategy,
            "restore finished"
        );
        Ok(outcome)
    }

    async fn preflight(&self) -> RestoreResult<C::Store> {
        let store = self
            .manager
            .store()
            .await
            .map_err(RestoreError::Preflight)?;
        store.probe().await.map_err(|e| {
            self.manager.report(&e);
            RestoreError::Preflight(e)
        })?;
        Ok(store)
    }

    async fn native_import(&self, store: &C::Store, path: &Path) -> RestoreResult<ImportOutcome> {
        let before = store.record_count().await.map_err(|e| self.observe(e))?;
        self.runner.restore(path).await?;
        let after = store.record_count().await.map_err(|e| self.observe(e))?;

        Ok(ImportOutcome {
            imported: after.saturating_sub(before),
            skipped: 0,
            errors: 0,
            strategy: RestoreStrategy::NativeRestore,
        })
    }

    async fn parsed_import(&self, store: &C::Store, path: &Path) -> RestoreResult<ImportOutcome> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RestoreError::io_at(path, e))?;
        let ParsedArtifact { plan, malformed } = plan_replay(&text, &self.layout);
        if plan.clear_first {
            warn!(
                table = %self.layout.table,
                "artifact carries an active DELETE; table will be cleared"
            );
        }

        let tally = store.replay(plan).await.map_err(|e| self.observe(e))?;
        Ok(ImportOutcome {
            imported: tally.imported,
            skipped: tally.skipped,
            errors: tally.errors + malformed,
            strategy: RestoreStrategy::ParsedInserts,
        })
    }

    fn observe(&self, err: StoreError) -> RestoreError {
        self.manager.report(&err);
        RestoreError::Store(err)
    }
}
