//! Backup artifacts on disk

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::errors::{BackupError, BackupResult};

const ARTIFACT_PREFIX: &str = "backup-";
const ARTIFACT_SUFFIX: &str = ".sql";
const PARTIAL_SUFFIX: &str = ".partial";
const RECORDS_HEADER: &str = "Records:";
const HEADER_SCAN_LINES: usize = 64;

/// One backup file. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// File name for an artifact taken at `at`; sorts chronologically
pub fn artifact_file_name(at: DateTime<Utc>) -> String {
    format!("{}{}{}", ARTIFACT_PREFIX, at.format("%Y%m%d-%H%M%S-%3f"), ARTIFACT_SUFFIX)
}

pub fn is_artifact_name(name: &str) -> bool {
    name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_SUFFIX)
}

/// Ordering key: the embedded timestamp, then the collision counter that
/// [`reserve_artifact_path`] appends (`backup-<ts>-<n>.sql`)
fn sequence_key(name: &str) -> (&str, u32) {
    let stem = name
        .strip_prefix(ARTIFACT_PREFIX)
        .and_then(|n| n.strip_suffix(ARTIFACT_SUFFIX))
        .unwrap_or(name);
    match stem.rsplit_once('-') {
        Some((base, n)) if base.matches('-').count() == 2 => match n.parse() {
            Ok(n) => (base, n),
            Err(_) => (stem, 0),
        },
        _ => (stem, 0),
    }
}

/// Where an artifact is written before it is complete
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    target.with_file_name(name)
}

/// Claim a fresh artifact path in `dir` by creating its `.partial` file
/// exclusively. Concurrent exports taken in the same millisecond each get
/// their own path. `dir` must exist.
pub fn reserve_artifact_path(dir: &Path, at: DateTime<Utc>) -> BackupResult<PathBuf> {
    let base = artifact_file_name(at);
    let stem = base.trim_end_matches(ARTIFACT_SUFFIX);
    let mut candidate = dir.join(&base);
    let mut n = 1;
    loop {
        if !candidate.exists() {
            let partial = partial_path(&candidate);
            match OpenOptions::new().write(true).create_new(true).open(&partial) {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(BackupError::io_at(&partial, e)),
            }
        }
        candidate = dir.join(format!("{}-{}{}", stem, n, ARTIFACT_SUFFIX));
        n += 1;
    }
}

/// The `-- Records: N` count from an artifact's comment header, if it has
/// one. Native dumps carry no such line.
pub fn artifact_record_count(path: &Path) -> BackupResult<Option<u64>> {
    let file = File::open(path).map_err(|e| BackupError::io_at(path, e))?;
    for line in BufReader::new(file).lines().take(HEADER_SCAN_LINES) {
        let line = line.map_err(|e| BackupError::io_at(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(comment) = line.strip_prefix("--") else {
            break;
        };
        if let Some(count) = comment.trim().strip_prefix(RECORDS_HEADER) {
            return Ok(count.trim().parse().ok());
        }
    }
    Ok(None)
}

/// Artifacts in `dir`, newest first. A missing directory has none.
pub fn list_artifacts(dir: &Path) -> BackupResult<Vec<BackupArtifact>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BackupError::io_at(dir, e)),
    };

    let mut artifacts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| BackupError::io_at(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_artifact_name(&name) {
            continue;
        }
        let path = entry.path();
        let metadata = entry.metadata().map_err(|e| BackupError::io_at(&path, e))?;
        if !metadata.is_file() {
            continue;
        }
        let created_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        artifacts.push(BackupArtifact {
            name,
            path,
            size_bytes: metadata.len(),
            created_at,
        });
    }

    artifacts.sort_by(|a, b| {
        sequence_key(&b.name)
            .cmp(&sequence_key(&a.name))
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    Ok(artifacts)
}

/// The newest artifact in `dir`, if any
pub fn latest_artifact(dir: &Path) -> BackupResult<Option<BackupArtifact>> {
    Ok(list_artifacts(dir)?.into_iter().next())
}

/// The newest artifact worth restoring from: one whose header does not
/// declare zero records. Artifacts whose header cannot be read still
/// qualify, so the restore reports the problem.
pub fn latest_restorable_artifact(dir: &Path) -> BackupResult<Option<BackupArtifact>> {
    Ok(list_artifacts(dir)?
        .into_iter()
        .find(|a| !matches!(artifact_record_count(&a.path), Ok(Some(0)))))
}
