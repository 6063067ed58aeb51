//! In-memory store with outage simulation
//!
//! All handles opened from one [`MemoryConnector`] share the same table, so a
//! "reconnect" sees the data written before the outage. The fault knobs
//! (`set_online`, `fail_next_opens`, `set_hanging`) act on every handle at
//! once.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    Record, RecordStore, ReplayPlan, ReplayTally, StoreConnector, StoreError, StoreResult,
    TableLayout,
};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<(u64, Record)>,
    next_id: u64,
    settings: BTreeMap<String, String>,
}

#[derive(Debug)]
struct Shared {
    layout: TableLayout,
    columns: Vec<String>,
    table: Mutex<Table>,
    online: AtomicBool,
    hanging: AtomicBool,
    failing_opens: AtomicU32,
    opens: AtomicU32,
    replays: AtomicU32,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn check(&self) -> StoreResult<()> {
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store is offline".to_string()));
        }
        Ok(())
    }

    /// Builds the stored form of a row: every known column in declaration
    /// order, the primary key assigned here.
    fn materialize(&self, id: u64, record: &Record) -> StoreResult<Record> {
        for column in record.columns() {
            if !self.columns.contains(&column) {
                return Err(StoreError::Query(format!("column \"{}\" does not exist", column)));
            }
        }
        let mut stored = Record::new();
        for column in &self.columns {
            let value = if *column == self.layout.primary_key {
                Some(id.to_string())
            } else {
                record.get(column).map(String::from)
            };
            stored.set(column.clone(), value);
        }
        Ok(stored)
    }

    fn insert(&self, table: &mut Table, record: &Record) -> StoreResult<()> {
        let key = record
            .get(&self.layout.natural_key)
            .ok_or_else(|| StoreError::MissingNaturalKey(self.layout.natural_key.clone()))?;
        if table
            .rows
            .iter()
            .any(|(_, r)| r.get(&self.layout.natural_key) == Some(key))
        {
            return Err(StoreError::Query(format!("duplicate key value \"{}\"", key)));
        }
        table.next_id += 1;
        let id = table.next_id;
        let stored = self.materialize(id, record)?;
        table.rows.push((id, stored));
        Ok(())
    }
}

/// Opens handles onto one shared in-memory table.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Create an online store whose table has `columns` (which should
    /// include the layout's primary and natural keys).
    pub fn new(layout: TableLayout, columns: &[&str]) -> Self {
        Self {
            shared: Arc::new(Shared {
                layout,
                columns: columns.iter().map(|c| c.to_string()).collect(),
                table: Mutex::new(Table::default()),
                online: AtomicBool::new(true),
                hanging: AtomicBool::new(false),
                failing_opens: AtomicU32::new(0),
                opens: AtomicU32::new(0),
                replays: AtomicU32::new(0),
            }),
        }
    }

    /// A handle that bypasses `open` (and its fault injection)
    pub fn store(&self) -> MemoryStore {
        MemoryStore {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::SeqCst);
    }

    /// Make every query on every handle wait forever
    pub fn set_hanging(&self, hanging: bool) {
        self.shared.hanging.store(hanging, Ordering::SeqCst);
    }

    /// The next `n` calls to `open` fail even when online
    pub fn fail_next_opens(&self, n: u32) {
        self.shared.failing_opens.store(n, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> u32 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn replay_count(&self) -> u32 {
        self.shared.replays.load(Ordering::SeqCst)
    }

    /// Delete every row, as a catastrophic loss would
    pub fn wipe(&self) {
        self.shared.table().rows.clear();
    }

    pub fn row_count(&self) -> usize {
        self.shared.table().rows.len()
    }
}

impl StoreConnector for MemoryConnector {
    type Store = MemoryStore;

    async fn open(&self) -> StoreResult<MemoryStore> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .shared
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        self.shared.check().await?;
        Ok(self.store())
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.shared.layout.table)
    }
}

/// Handle onto the shared in-memory table.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl RecordStore for MemoryStore {
    async fn probe(&self) -> StoreResult<()> {
        self.shared.check().await
    }

    async fn close(&self) {}

    async fn record_count(&self) -> StoreResult<u64> {
        self.shared.check().await?;
        Ok(self.shared.table().rows.len() as u64)
    }

    async fn columns(&self) -> StoreResult<Vec<String>> {
        self.shared.check().await?;
        Ok(self.shared.columns.clone())
    }

    async fn fetch_rows(&self, columns: &[String]) -> StoreResult<Vec<Record>> {
        self.shared.check().await?;
        let table = self.shared.table();
        let mut rows: Vec<&(u64, Record)> = table.rows.iter().collect();
        rows.sort_by_key(|(id, _)| *id);
        Ok(rows
            .into_iter()
            .map(|(_, stored)| {
                let mut projected = Record::new();
                for column in columns {
                    projected.set(column.clone(), stored.get(column).map(String::from));
                }
                projected
            })
            .collect())
    }

    async fn replay(&self, plan: ReplayPlan) -> StoreResult<ReplayTally> {
        self.shared.check().await?;
        self.shared.replays.fetch_add(1, Ordering::SeqCst);

        let natural_key = self.shared.layout.natural_key.clone();
        let mut table = self.shared.table();
        let mut working = Table {
            rows: if plan.clear_first { Vec::new() } else { table.rows.clone() },
            next_id: table.next_id,
            settings: BTreeMap::new(),
        };

        let mut tally = ReplayTally::default();
        for row in &plan.rows {
            let exists = row.get(&natural_key).map(|key| {
                working
                    .rows
                    .iter()
                    .any(|(_, r)| r.get(&natural_key) == Some(key))
            });
            match exists {
                Some(true) => tally.skipped += 1,
                Some(false) => match self.shared.insert(&mut working, row) {
                    Ok(()) => tally.imported += 1,
                    Err(_) => tally.errors += 1,
                },
                None => tally.errors += 1,
            }
        }

        table.rows = working.rows;
        table.next_id = working.next_id;
        Ok(tally)
    }

    async fn add_record(&self, record: &Record) -> StoreResult<()> {
        self.shared.check().await?;
        let mut table = self.shared.table();
        self.shared.insert(&mut table, record)
    }

    async fn remove_record(&self, path: &str) -> StoreResult<bool> {
        self.shared.check().await?;
        let natural_key = &self.shared.layout.natural_key;
        let mut table = self.shared.table();
        let before = table.rows.len();
        table.rows.retain(|(_, r)| r.get(natural_key) != Some(path));
        Ok(table.rows.len() != before)
    }

    async fn all_records(&self) -> StoreResult<Vec<Record>> {
        let columns = self.columns().await?;
        self.fetch_rows(&columns).await
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.shared.check().await?;
        Ok(self.shared.table().settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.shared.check().await?;
        self.shared
            .table()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> MemoryConnector {
        MemoryConnector::new(TableLayout::default(), &["id", "path", "title", "created_at"])
    }

    #[tokio::test]
    async fn test_add_assigns_ids_and_counts() {
        let connector = connector();
        let store = connector.store();
        store.add_record(&Record::new().with("path", "a.png")).await.unwrap();
        store.add_record(&Record::new().with("path", "b.png")).await.unwrap();

        assert_eq!(store.record_count().await.unwrap(), 2);
        let rows = store.all_records().await.unwrap();
        assert_eq!(rows[0].get("id"), Some("1"));
        assert_eq!(rows[1].get("path"), Some("b.png"));
        assert_eq!(rows[1].get("title"), None);
    }

    #[tokio::test]
    async fn test_duplicate_natural_key_rejected() {
        let store = connector().store();
        store.add_record(&Record::new().with("path", "a.png")).await.unwrap();
        assert!(store.add_record(&Record::new().with("path", "a.png")).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_is_connectivity_error() {
        let connector = connector();
        connector.set_online(false);
        let err = connector.store().record_count().await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(connector.open().await.is_err());
    }

    #[tokio::test]
    async fn test_failing_opens_then_success() {
        let connector = connector();
        connector.fail_next_opens(2);
        assert!(connector.open().await.is_err());
        assert!(connector.open().await.is_err());
        assert!(connector.open().await.is_ok());
        assert_eq!(connector.open_count(), 3);
    }

    #[tokio::test]
    async fn test_replay_skips_existing_and_counts_errors() {
        let connector = connector();
        let store = connector.store();
        store.add_record(&Record::new().with("path", "a.png")).await.unwrap();

        let tally = store
            .replay(ReplayPlan {
                clear_first: false,
                rows: vec![
                    Record::new().with("path", "a.png"),
                    Record::new().with("path", "b.png"),
                    Record::new().with("title", "no path"),
                    Record::new().with("path", "c.png").with("bogus", "x"),
                ],
            })
            .await
            .unwrap();

        assert_eq!(
            tally,
            ReplayTally {
                imported: 1,
                skipped: 1,
                errors: 2
            }
        );
        assert_eq!(connector.row_count(), 2);
        assert_eq!(connector.replay_count(), 1);
    }

    #[tokio::test]
    async fn test_replay_clear_first() {
        let connector = connector();
        let store = connector.store();
        store.add_record(&Record::new().with("path", "old.png")).await.unwrap();

        store
            .replay(ReplayPlan {
                clear_first: true,
                rows: vec![Record::new().with("path", "new.png")],
            })
            .await
            .unwrap();

        let rows = store.all_records().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("path"), Some("new.png"));
    }

    #[tokio::test]
    async fn test_settings() {
        let store = connector().store();
        assert_eq!(store.get_setting("theme").await.unwrap(), None);
        store.set_setting("theme", "dark").await.unwrap();
        store.set_setting("theme", "light").await.unwrap();
        assert_eq!(store.get_setting("theme").await.unwrap(), Some("light".into()));
    }
}
