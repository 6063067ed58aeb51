//! Backup subsystem
//!
//! Backup produces a portable SQL-text artifact of the primary table.
//!
//! # Artifact Format
//!
//! ```text
//! -- pixelvault backup
//! -- Created: 2026-10-15T03:00:00.000Z
//! -- Table: images
//! -- Records: 2
//! -- Uncomment the next line to replace the table contents on restore:
//! -- DELETE FROM images;
//!
//! INSERT INTO images (path, title, created_at) VALUES ('a.png', 'O''Brien', '2026-...');
//! INSERT INTO images (path, title, created_at) VALUES ('b.png', NULL, '2026-...');
//! ```
//!
//! # Strategies
//!
//! 1. Native dump (`pg_dump --data-only --column-inserts`) when the tools are
//!    installed.
//! 2. Generated INSERTs, read row by row in primary-key order.
//!
//! If the native dump fails the generator runs for that call; if the
//! generator fails too, the native error is returned.
//!
//! # Important
//!
//! Artifacts are written to a `.partial` file and renamed into place, so a
//! visible artifact is always complete. Artifacts are never modified after
//! that; retention only deletes them.

mod artifact;
mod errors;
mod generator;
mod schedule;

pub use artifact::{
    artifact_file_name, artifact_record_count, is_artifact_name, latest_artifact,
    latest_restorable_artifact, list_artifacts, reserve_artifact_path, BackupArtifact,
};
pub use errors::{BackupError, BackupResult};
pub use generator::render_dump;
pub use schedule::{run_scheduled, BackupSchedule};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::store::{RecordStore, StoreConnector, StoreResult, TableLayout};
use crate::tools::{ToolDetector, ToolRunner};

use artifact::partial_path;

async fn create_dir(dir: &Path) -> BackupResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| BackupError::io_at(dir, e))
}

/// How an artifact was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportStrategy {
    NativeDump,
    GeneratedInserts,
}

/// Result of a successful export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub record_count: u64,
    pub strategy: ExportStrategy,
}

/// Exports the primary table to backup artifacts.
pub struct BackupEngine<C: StoreConnector> {
    manager: Arc<ConnectionManager<C>>,
    tools: Arc<ToolDetector>,
    runner: ToolRunner,
    layout: TableLayout,
    dir: PathBuf,
}

impl<C: StoreConnector> BackupEngine<C> {
    pub fn new(
        manager: Arc<ConnectionManager<C>>,
        tools: Arc<ToolDetector>,
        runner: ToolRunner,
        layout: TableLayout,
        dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            manager,
            tools,
            runner,
            layout,
            dir: dir.into(),
        }
    }

    /// Directory new artifacts are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    /// Export every record. Without `path`, a timestamped artifact is
    /// created in the backups directory.
    pub async fn export_backup(&self, path: Option<&Path>) -> BackupResult<ExportOutcome> {
        let target = match path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    create_dir(parent).await?;
                }
                path.to_path_buf()
            }
            None => {
                create_dir(&self.dir).await?;
                reserve_artifact_path(&self.dir, Utc::now())?
            }
        };

        let partial = partial_path(&target);
        let (record_count, strategy) = match self.export_to(&partial).await {
            Ok(done) => done,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(BackupError::io_at(&target, e));
        }

        info!(
            path = %target.display(),
            record_count,
            ?strategy,
            "backup written"
        );
        Ok(ExportOutcome {
            path: target,
            record_count,
            strategy,
        })
    }

    async fn export_to(&self, output: &Path) -> BackupResult<(u64, ExportStrategy)> {
        if !self.tools.detect().await {
            let count = self.generated_export(output).await?;
            return Ok((count, ExportStrategy::GeneratedInserts));
        }

        let native_err = match self.native_export(output).await {
            Ok(count) => return Ok((count, ExportStrategy::NativeDump)),
            Err(e) => e,
        };
        warn!(error = %native_err, "native dump failed; generating INSERTs instead");

        match self.generated_export(output).await {
            Ok(count) => Ok((count, ExportStrategy::GeneratedInserts)),
            Err(fallback_err) => {
                warn!(error = %fallback_err, "generated export failed too");
                Err(native_err)
            }
        }
    }

    async fn native_export(&self, output: &Path) -> BackupResult<u64> {
        self.runner.dump(&self.layout.table, output).await?;
        let store = self.observe(self.manager.store().await)?;
        self.observe(store.record_count().await)
    }

    async fn generated_export(&self, output: &Path) -> BackupResult<u64> {
        let store = self.observe(self.manager.store().await)?;
        let columns: Vec<String> = self
            .observe(store.columns().await)?
            .into_iter()
            .filter(|c| *c != self.layout.primary_key)
            .collect();
        let rows = self.observe(store.fetch_rows(&columns).await)?;

        let text = render_dump(&self.layout.table, &columns, &rows, Utc::now());
        let mut file = tokio::fs::File::create(output)
            .await
            .map_err(|e| BackupError::io_at(output, e))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| BackupError::io_at(output, e))?;
        file.sync_all()
            .await
            .map_err(|e| BackupError::io_at(output, e))?;

        Ok(rows.len() as u64)
    }

    fn observe<T>(&self, result: StoreResult<T>) -> BackupResult<T> {
        result.map_err(|e| {
            self.manager.report(&e);
            BackupError::Store(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, DatabaseConfig};
    use crate::connection::ConnectionSettings;
    use crate::store::{MemoryConnector, Record};
    use tempfile::TempDir;

    async fn engine(
        tools_available: bool,
        dump_binary: &str,
    ) -> (BackupEngine<MemoryConnector>, MemoryConnector, TempDir) {
        let connector = MemoryConnector::new(TableLayout::default(), &["id", "path", "title"]);
        let manager = ConnectionManager::new(connector.clone(), ConnectionSettings::default());
        manager.connect().await.unwrap();

        let mut backups = BackupConfig::default();
        backups.dump_binary = dump_binary.to_string();
        let runner = ToolRunner::from_config(&DatabaseConfig::default(), &backups);

        let dir = TempDir::new().unwrap();
        let engine = BackupEngine::new(
            manager,
            Arc::new(ToolDetector::with_known(tools_available)),
            runner,
            TableLayout::default(),
            dir.path().join("backups"),
        );
        (engine, connector, dir)
    }

    #[tokio::test]
    async fn test_generated_export_creates_dir_and_artifact() {
        let (engine, connector, _dir) = engine(false, "pg_dump").await;
        let store = connector.store();
        store.add_record(&Record::new().with("path", "a.png").with("title", "it's")).await.unwrap();
        store.add_record(&Record::new().with("path", "b.png")).await.unwrap();

        let outcome = engine.export_backup(None).await.unwrap();
        assert_eq!(outcome.record_count, 2);
        assert_eq!(outcome.strategy, ExportStrategy::GeneratedInserts);
        assert!(outcome.path.starts_with(engine.dir()));

        let text = std::fs::read_to_string(&outcome.path).unwrap();
        assert!(text.contains("INSERT INTO images (path, title) VALUES ('a.png', 'it''s');"));
        assert!(!text.contains("(id,"));
        assert_eq!(list_artifacts(engine.dir()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_exports_write_separate_artifacts() {
        let (engine, connector, _dir) = engine(false, "pg_dump").await;
        for i in 0..20 {
            connector
                .store()
                .add_record(&Record::new().with("path", format!("{}.png", i)))
                .await
                .unwrap();
        }

        let (first, second, third) = tokio::join!(
            engine.export_backup(None),
            engine.export_backup(None),
            engine.export_backup(None)
        );
        let paths = [first.unwrap().path, second.unwrap().path, third.unwrap().path];

        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        assert_ne!(paths[0], paths[2]);
        for path in &paths {
            assert_eq!(artifact_record_count(path).unwrap(), Some(20));
        }
        assert_eq!(list_artifacts(engine.dir()).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_explicit_path() {
        let (engine, _connector, dir) = engine(false, "pg_dump").await;
        let target = dir.path().join("manual").join("snapshot.sql");
        let outcome = engine.export_backup(Some(&target)).await.unwrap();
        assert_eq!(outcome.path, target);
        assert!(target.exists());
    }

    #[tokio::test]
    async fn test_native_failure_falls_back_to_generated() {
        let (engine, connector, _dir) = engine(true, "pixelvault-no-such-dump").await;
        connector.store().add_record(&Record::new().with("path", "a.png")).await.unwrap();

        let outcome = engine.export_backup(None).await.unwrap();
        assert_eq!(outcome.strategy, ExportStrategy::GeneratedInserts);
        assert_eq!(outcome.record_count, 1);
    }

    #[tokio::test]
    async fn test_double_failure_returns_native_error_and_leaves_nothing() {
        let (engine, connector, _dir) = engine(true, "pixelvault-no-such-dump").await;
        connector.set_online(false);

        let err = engine.export_backup(None).await.unwrap_err();
        assert_eq!(err.code(), "PV_BACKUP_TOOL");
        let leftovers = std::fs::read_dir(engine.dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_generated_failure_without_tools_propagates_store_error() {
        let (engine, connector, _dir) = engine(false, "pg_dump").await;
        connector.set_online(false);
        let err = engine.export_backup(None).await.unwrap_err();
        assert!(matches!(err, BackupError::Store(_)));
    }
}
