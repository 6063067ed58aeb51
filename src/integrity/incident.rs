//! Incident log
//!
//! Anomalies and recovery attempts are appended as one JSON object per line.
//! The log is append-only and each entry is synced before `append` returns.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{IntegrityError, IntegrityResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    /// Count fell sharply but not to zero; no action taken
    PartialLoss,
    /// Count fell to zero and no artifact was available
    NoBackup,
    RecoveryStarted,
    RecoveryCompleted,
    RecoveryFailed,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::PartialLoss => "PARTIAL_LOSS",
            IncidentKind::NoBackup => "NO_BACKUP",
            IncidentKind::RecoveryStarted => "RECOVERY_STARTED",
            IncidentKind::RecoveryCompleted => "RECOVERY_COMPLETED",
            IncidentKind::RecoveryFailed => "RECOVERY_FAILED",
        }
    }
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One incident log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: IncidentKind,
    /// Last known record count before the anomaly
    pub before: u64,
    /// Record count observed (or restored to)
    pub after: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IncidentRecord {
    pub fn new(kind: IncidentKind, before: u64, after: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            before,
            after,
            backup: None,
            error: None,
        }
    }

    pub fn with_backup(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup = Some(path.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Serialize to a single JSON line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"id":"{}","kind":"{}","error":"unserializable: {}"}}"#,
                self.id, self.kind, e
            )
        })
    }
}

/// Append-only sink for incident records.
pub trait IncidentLog: Send + Sync {
    /// Append and sync one record. The record is durable once this returns.
    fn append(&self, record: &IncidentRecord) -> IntegrityResult<()>;
}

/// Incident log backed by a JSON-lines file.
#[derive(Debug)]
pub struct FileIncidentLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileIncidentLog {
    /// Open or create the log, creating its directory if needed.
    pub fn open(path: impl AsRef<Path>) -> IntegrityResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| IntegrityError::log_at(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| IntegrityError::log_at(&path, e))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the log at `path`; unparseable lines are skipped
    pub fn read_all(path: impl AsRef<Path>) -> IntegrityResult<Vec<IncidentRecord>> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(IntegrityError::log_at(path, e)),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl IncidentLog for FileIncidentLog {
    fn append(&self, record: &IncidentRecord) -> IntegrityResult<()> {
        let mut writer = lock(&self.writer);
        write_line(&mut writer, &record.to_json())
            .map_err(|e| IntegrityError::log_at(&self.path, e))
    }
}

fn write_line(writer: &mut BufWriter<File>, line: &str) -> io::Result<()> {
    writeln!(writer, "{}", line)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

/// In-memory incident log for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryIncidentLog {
    records: Arc<Mutex<Vec<IncidentRecord>>>,
}

impl MemoryIncidentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<IncidentRecord> {
        lock(&self.records).clone()
    }

    pub fn kinds(&self) -> Vec<IncidentKind> {
        lock(&self.records).iter().map(|r| r.kind).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }
}

impl IncidentLog for MemoryIncidentLog {
    fn append(&self, record: &IncidentRecord) -> IntegrityResult<()> {
        lock(&self.records).push(record.clone());
        Ok(())
    }
}
