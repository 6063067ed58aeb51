//! Retention
//!
//! Prunes backup artifacts, keeping the newest `keep`. Only `backup-*.sql`
//! files are considered; the incident log and in-flight `.partial` files are
//! never touched.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::backup::{list_artifacts, BackupArtifact, BackupResult};

/// Default number of artifacts kept
pub const DEFAULT_KEEP: usize = 10;

/// What a cleanup pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub kept: usize,
    pub removed: Vec<PathBuf>,
    /// Artifacts that could not be deleted, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

/// Deletes old artifacts from one backups directory.
#[derive(Debug, Clone)]
pub struct RetentionManager {
    dir: PathBuf,
}

impl RetentionManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifacts, newest first
    pub fn list(&self) -> BackupResult<Vec<BackupArtifact>> {
        list_artifacts(&self.dir)
    }

    /// Delete every artifact beyond the newest `keep`.
    ///
    /// A failed deletion is logged and recorded in the report; the rest of
    /// the pass continues. Only listing the directory can fail the call.
    pub fn clean(&self, keep: usize) -> BackupResult<CleanReport> {
        self.clean_with(keep, |path| std::fs::remove_file(path))
    }

    fn clean_with<F>(&self, keep: usize, mut remove: F) -> BackupResult<CleanReport>
    where
        F: FnMut(&Path) -> io::Result<()>,
    {
        let artifacts = self.list()?;
        let mut report = CleanReport {
            kept: artifacts.len().min(keep),
            ..CleanReport::default()
        };

        for artifact in artifacts.into_iter().skip(keep) {
            match remove(&artifact.path) {
                Ok(()) => {
                    info!(path = %artifact.path.display(), "removed old backup");
                    report.removed.push(artifact.path);
                }
                Err(e) => {
                    warn!(
                        path = %artifact.path.display(),
                        error = %e,
                        "failed to remove old backup"
                    );
                    report.failed.push((artifact.path, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}
