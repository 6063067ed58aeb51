//! PostgreSQL store on a `sqlx` pool

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, warn};

use super::{
    Record, RecordStore, ReplayPlan, ReplayTally, StoreConnector, StoreError, StoreResult,
    TableLayout,
};
use crate::config::DatabaseConfig;
use crate::sql::{is_valid_identifier, quote_identifier, render_value};

/// Opens `PgStore` handles from connection settings.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    target: String,
    max_connections: u32,
    acquire_timeout: Duration,
    layout: Arc<TableLayout>,
    settings_table: String,
}

impl PgConnector {
    pub fn from_config(config: &DatabaseConfig) -> StoreResult<Self> {
        let layout = config.layout();
        layout.validate()?;
        if !is_valid_identifier(&config.settings_table) {
            return Err(StoreError::InvalidIdentifier(config.settings_table.clone()));
        }

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .database(&config.database);
        if let Some(password) = config.password() {
            options = options.password(&password);
        }

        Ok(Self {
            options,
            target: format!("{}@{}:{}/{}", config.user, config.host, config.port, config.database),
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout(),
            layout: Arc::new(layout),
            settings_table: config.settings_table.clone(),
        })
    }
}

impl StoreConnector for PgConnector {
    type Store = PgStore;

    async fn open(&self) -> StoreResult<PgStore> {
        debug!(target = %self.target, "opening connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(self.options.clone())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(PgStore {
            pool,
            layout: Arc::clone(&self.layout),
            settings_table: quote_identifier(&self.settings_table),
        })
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

/// A PostgreSQL connection pool bound to the primary table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    layout: Arc<TableLayout>,
    settings_table: String,
}

impl PgStore {
    fn table(&self) -> String {
        quote_identifier(&self.layout.table)
    }

    fn checked_columns(columns: &[String]) -> StoreResult<Vec<String>> {
        columns
            .iter()
            .map(|c| {
                if is_valid_identifier(c) {
                    Ok(quote_identifier(c))
                } else {
                    Err(StoreError::InvalidIdentifier(c.clone()))
                }
            })
            .collect()
    }

    /// Values are sent as quoted literals rather than bound `text`
    /// parameters so the server coerces them to each column's type.
    fn insert_sql(&self, record: &Record) -> StoreResult<String> {
        let columns = Self::checked_columns(&record.columns())?;
        let values: Vec<String> = record
            .fields()
            .iter()
            .map(|(_, v)| render_value(v.as_deref()))
            .collect();
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            columns.join(", "),
            values.join(", ")
        ))
    }

    async fn replay_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        exists_sql: &str,
        insert_sql: &str,
        key: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut savepoint = sqlx::Connection::begin(&mut **tx).await?;

        let exists: bool = sqlx::query_scalar(exists_sql)
            .bind(key)
            .fetch_one(&mut *savepoint)
            .await?;
        if exists {
            savepoint.commit().await?;
            return Ok(false);
        }

        match sqlx::query(insert_sql).execute(&mut *savepoint).await {
            Ok(_) => {
                savepoint.commit().await?;
                Ok(true)
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e)
            }
        }
    }
}

impl RecordStore for PgStore {
    async fn probe(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn record_count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn columns(&self) -> StoreResult<Vec<String>> {
        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
        )
        .bind(&self.layout.table)
        .fetch_all(&self.pool)
        .await?;

        if columns.is_empty() {
            return Err(StoreError::Query(format!(
                "table {} has no columns or does not exist",
                self.layout.table
            )));
        }
        Ok(columns)
    }

    async fn fetch_rows(&self, columns: &[String]) -> StoreResult<Vec<Record>> {
        let quoted = Self::checked_columns(columns)?;
        let select: Vec<String> = quoted.iter().map(|c| format!("{c}::text")).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select.join(", "),
            self.table(),
            quote_identifier(&self.layout.primary_key)
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record = Record::new();
            for (index, column) in columns.iter().enumerate() {
                let value: Option<String> = row.try_get(index)?;
                record.set(column.clone(), value);
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn replay(&self, plan: ReplayPlan) -> StoreResult<ReplayTally> {
        let natural_key = &self.layout.natural_key;
        let exists_sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1)",
            self.table(),
            quote_identifier(natural_key)
        );

        let mut tx = self.pool.begin().await?;
        if plan.clear_first {
            let deleted = sqlx::query(&format!("DELETE FROM {}", self.table()))
                .execute(&mut *tx)
                .await?;
            debug!(rows = deleted.rows_affected(), "cleared table before replay");
        }

        let mut tally = ReplayTally::default();
        for row in &plan.rows {
            let Some(key) = row.get(natural_key) else {
                tally.errors += 1;
                continue;
            };
            let insert_sql = match self.insert_sql(row) {
                Ok(sql) => sql,
                Err(e) => {
                    warn!(path = key, error = %e, "skipping row");
                    tally.errors += 1;
                    continue;
                }
            };

            match Self::replay_row(&mut tx, &exists_sql, &insert_sql, key).await {
                Ok(true) => tally.imported += 1,
                Ok(false) => tally.skipped += 1,
                Err(e) => {
                    let err = StoreError::from(e);
                    if err.is_connectivity() {
                        return Err(err);
                    }
                    warn!(path = key, error = %err, "row failed during replay");
                    tally.errors += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(tally)
    }

    async fn add_record(&self, record: &Record) -> StoreResult<()> {
        if record.get(&self.layout.natural_key).is_none() {
            return Err(StoreError::MissingNaturalKey(self.layout.natural_key.clone()));
        }
        let sql = self.insert_sql(record)?;
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn remove_record(&self, path: &str) -> StoreResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            self.table(),
            quote_identifier(&self.layout.natural_key)
        );
        let result = sqlx::query(&sql).bind(path).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn all_records(&self) -> StoreResult<Vec<Record>> {
        let columns = self.columns().await?;
        self.fetch_rows(&columns).await
    }

    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let sql = format!("SELECT value FROM {} WHERE key = $1", self.settings_table);
        let value: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.flatten())
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            self.settings_table
        );
        sqlx::query(&sql).bind(key).bind(value).execute(&self.pool).await?;
        Ok(())
    }
}
