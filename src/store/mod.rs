//! Store abstraction for the primary table
//!
//! Everything above this module talks to the relational store through two
//! traits:
//!
//! - [`StoreConnector`] opens a fresh pool handle. The connection manager
//!   calls it on startup and on every reconnection attempt and swaps the
//!   resulting handle in; a handle is never repaired in place.
//! - [`RecordStore`] is the handle itself: cheap to clone, safe to share
//!   across background tasks.
//!
//! [`postgres`] is the production implementation; [`memory`] backs tests and
//! dry runs and can simulate outages.

mod errors;
pub mod memory;
pub mod postgres;
mod record;

pub use errors::{StoreError, StoreResult};
pub use memory::{MemoryConnector, MemoryStore};
pub use postgres::{PgConnector, PgStore};
pub use record::Record;

use std::future::Future;

use crate::sql::is_valid_identifier;

/// Names of the primary table and its key columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    /// Table holding the records
    pub table: String,
    /// Surrogate key column; regenerated by the store on restore
    pub primary_key: String,
    /// Natural key used to detect duplicates on restore
    pub natural_key: String,
    /// Columns whose NULL values are left to the store default on restore
    pub timestamp_columns: Vec<String>,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            table: "images".to_string(),
            primary_key: "id".to_string(),
            natural_key: "path".to_string(),
            timestamp_columns: vec!["created_at".to_string(), "updated_at".to_string()],
        }
    }
}

impl TableLayout {
    /// Rejects any name that is not a plain identifier
    pub fn validate(&self) -> StoreResult<()> {
        let names = [&self.table, &self.primary_key, &self.natural_key]
            .into_iter()
            .chain(self.timestamp_columns.iter());
        for name in names {
            if !is_valid_identifier(name) {
                return Err(StoreError::InvalidIdentifier(name.clone()));
            }
        }
        Ok(())
    }

    pub fn is_timestamp_column(&self, column: &str) -> bool {
        self.timestamp_columns.iter().any(|c| c == column)
    }
}

/// Rows to replay into the primary table in one transaction
#[derive(Debug, Clone, Default)]
pub struct ReplayPlan {
    /// Delete every row before inserting
    pub clear_first: bool,
    pub rows: Vec<Record>,
}

/// Per-row outcome counts of a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayTally {
    pub imported: u64,
    /// Rows whose natural key already existed
    pub skipped: u64,
    pub errors: u64,
}

/// A live handle to the store (one connection pool).
pub trait RecordStore: Clone + Send + Sync + 'static {
    /// Run a trivial query
    fn probe(&self) -> impl Future<Output = StoreResult<()>> + Send;

    /// Dispose of the pool
    fn close(&self) -> impl Future<Output = ()> + Send;

    fn record_count(&self) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Column names of the primary table in declaration order
    fn columns(&self) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    /// All rows in primary-key order, projected onto `columns`, every value
    /// cast to text
    fn fetch_rows(&self, columns: &[String])
        -> impl Future<Output = StoreResult<Vec<Record>>> + Send;

    /// Insert rows inside one transaction. Rows whose natural key already
    /// exists are skipped; a failing row is counted and does not abort the
    /// others. An error return means nothing was committed.
    fn replay(&self, plan: ReplayPlan) -> impl Future<Output = StoreResult<ReplayTally>> + Send;

    fn add_record(&self, record: &Record) -> impl Future<Output = StoreResult<()>> + Send;

    /// Delete by natural key; returns whether a row was removed
    fn remove_record(&self, path: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    fn all_records(&self) -> impl Future<Output = StoreResult<Vec<Record>>> + Send;

    fn get_setting(&self, key: &str) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    fn set_setting(&self, key: &str, value: &str)
        -> impl Future<Output = StoreResult<()>> + Send;
}

/// Opens new store handles.
pub trait StoreConnector: Send + Sync + 'static {
    type Store: RecordStore;

    fn open(&self) -> impl Future<Output = StoreResult<Self::Store>> + Send;

    /// Human-readable target for logs; never includes credentials
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_valid() {
        assert!(TableLayout::default().validate().is_ok());
        assert!(TableLayout::default().is_timestamp_column("created_at"));
        assert!(!TableLayout::default().is_timestamp_column("path"));
    }

    #[test]
    fn test_layout_rejects_injection() {
        let layout = TableLayout {
            table: "images; DROP TABLE users".to_string(),
            ..TableLayout::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }
}
