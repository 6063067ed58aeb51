//! Retention Tests
//!
//! Tests for:
//! - After cleanup at most `keep` artifacts remain, and they are the newest
//! - Artifacts written in the same millisecond keep their write order
//! - Files that are not artifacts are never deleted

use std::fs;
use std::path::Path;
use std::sync::Arc;

use pixelvault::integrity::MemoryIncidentLog;
use pixelvault::retention::RetentionManager;
use pixelvault::store::{MemoryConnector, Record, TableLayout};
use pixelvault::{Config, Resilience};
use tempfile::TempDir;

fn write_artifact(dir: &Path, day: u32) -> String {
    let name = format!("backup-202603{:02}-120000-000.sql", day);
    fs::write(dir.join(&name), "-- pixelvault backup\n").unwrap();
    name
}

/// 15 artifacts, keep 10: the 10 newest remain.
#[test]
fn test_fifteen_artifacts_pruned_to_ten() {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (1..=15).map(|day| write_artifact(dir.path(), day)).collect();
    fs::write(dir.path().join("incidents.log"), "{}\n").unwrap();
    fs::write(dir.path().join("backup-20260399-000000-000.sql.partial"), "").unwrap();

    let retention = RetentionManager::new(dir.path());
    let report = retention.clean(10).unwrap();

    assert_eq!(report.kept, 10);
    assert_eq!(report.removed.len(), 5);
    assert!(report.failed.is_empty());

    let remaining: Vec<String> = retention.list().unwrap().into_iter().map(|a| a.name).collect();
    let mut expected: Vec<String> = names[5..].to_vec();
    expected.reverse();
    assert_eq!(remaining, expected, "the newest ten must survive");

    assert!(dir.path().join("incidents.log").exists());
    assert!(dir.path().join("backup-20260399-000000-000.sql.partial").exists());
}

/// Cleaning twice is a no-op the second time.
#[test]
fn test_clean_is_idempotent() {
    let dir = TempDir::new().unwrap();
    for day in 1..=12 {
        write_artifact(dir.path(), day);
    }
    let retention = RetentionManager::new(dir.path());

    assert_eq!(retention.clean(10).unwrap().removed.len(), 2);
    let second = retention.clean(10).unwrap();
    assert_eq!(second.kept, 10);
    assert!(second.removed.is_empty());
}

/// Rapid exports collide on the timestamp and still prune oldest first.
#[tokio::test]
async fn test_rapid_exports_prune_oldest() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.backups.dir = dir.path().join("backups");
    config.backups.schedule = None;
    config.backups.use_native_tools = false;

    let connector = MemoryConnector::new(TableLayout::default(), &["id", "path"]);
    let subsystem = Resilience::assemble(config, connector, Arc::new(MemoryIncidentLog::new()));
    subsystem.start().await.unwrap();

    let mut exported = Vec::new();
    for i in 0..15 {
        subsystem
            .add_record(&Record::new().with("path", format!("{}.png", i)))
            .await
            .unwrap();
        exported.push(subsystem.export_backup(None).await.unwrap());
    }

    let report = subsystem.clean_backups(10).unwrap();
    assert_eq!(report.kept, 10);
    assert_eq!(report.removed.len(), 5);

    let remaining = subsystem.retention().list().unwrap();
    assert_eq!(remaining.len(), 10);
    assert_eq!(remaining[0].path, exported[14].path, "newest export must survive");
    for old in &exported[..5] {
        assert!(!old.path.exists(), "{} should be pruned", old.path.display());
    }
    subsystem.shutdown().await;
}
