//! SQLite persistence for processed orders and settings
//!
//! Tables (see `sql/`):
//! - `processed_orders` - one row per delivered order, INSERT OR IGNORE only
//! - `bot_settings` - key/value flags, including report claim dates
//!
//! The database file is opened per operation instead of holding one connection
//! for the process lifetime. Other processes (the chat bot, housekeeping
//! scripts) touch the same file, so lock contention is expected and surfaces
//! as `StoreError::Transient` for `RetryableStore` to retry.

use super::error::StoreError;
use super::types::ProcessedOrderRecord;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Schema files, applied in order on open. Each uses IF NOT EXISTS.
const SCHEMA: &[(&str, &str)] = &[
    ("00_processed_orders.sql", include_str!("../../sql/00_processed_orders.sql")),
    ("01_bot_settings.sql", include_str!("../../sql/01_bot_settings.sql")),
];

/// Raw durable store operations. No retries happen at this level.
pub trait OrderStore: Send + Sync {
    fn has_processed(&self, order_uid: &str) -> Result<bool, StoreError>;

    /// Insert the processed record. A second insert for the same uid is a no-op.
    fn mark_processed(
        &self,
        order_uid: &str,
        order_id: i64,
        created_at: &str,
        processed_at: i64,
    ) -> Result<(), StoreError>;

    fn processed_record(&self, order_uid: &str) -> Result<Option<ProcessedOrderRecord>, StoreError>;

    fn processed_count(&self) -> Result<u64, StoreError>;

    /// Records with `start <= processed_at < end` (unix seconds)
    fn count_processed_between(&self, start: i64, end: i64) -> Result<u64, StoreError>;

    /// Housekeeping: drop records processed before `cutoff`. Returns rows removed.
    fn prune_processed_before(&self, cutoff: i64) -> Result<usize, StoreError>;

    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomic: persist and return true only when no value exists for `key`.
    fn set_setting_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Atomic: persist and return true unless `key` already holds `value`.
    fn claim_daily(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    fn delete_setting(&self, key: &str) -> Result<(), StoreError>;
}

/// File-backed SQLite implementation of `OrderStore`
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and apply the schema.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = db_path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Permanent(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let store = Self {
            path,
            busy_timeout: Duration::from_millis(250),
        };

        let conn = store.connect()?;
        apply_schema(&conn)?;
        log::info!("✅ SQLite store ready: {}", store.path.display());

        Ok(store)
    }

    /// How long a single statement waits on a lock before returning SQLITE_BUSY
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

/// Enable WAL and run every schema file in order.
pub fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("📊 journal_mode = {}", mode);

    for (name, sql) in SCHEMA {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }

    Ok(())
}

impl OrderStore for SqliteStore {
    fn has_processed(&self, order_uid: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT 1 FROM processed_orders WHERE order_uid = ?1")?;
        Ok(stmt.exists([order_uid])?)
    }

    fn mark_processed(
        &self,
        order_uid: &str,
        order_id: i64,
        created_at: &str,
        processed_at: i64,
    ) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO processed_orders (order_uid, order_id, created_at, processed_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![order_uid, order_id, created_at, processed_at],
        )?;

        if inserted == 0 {
            log::debug!("Order {} was already recorded as processed", order_uid);
        }
        Ok(())
    }

    fn processed_record(&self, order_uid: &str) -> Result<Option<ProcessedOrderRecord>, StoreError> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT order_uid, order_id, created_at, processed_at
                 FROM processed_orders WHERE order_uid = ?1",
                [order_uid],
                |row| {
                    Ok(ProcessedOrderRecord {
                        order_uid: row.get(0)?,
                        order_id: row.get(1)?,
                        created_at: row.get(2)?,
                        processed_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn processed_count(&self) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM processed_orders", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_processed_between(&self, start: i64, end: i64) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_orders WHERE processed_at >= ?1 AND processed_at < ?2",
            params![start, end],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn prune_processed_before(&self, cutoff: i64) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM processed_orders WHERE processed_at < ?1",
            [cutoff],
        )?;
        Ok(deleted)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.connect()?;
        let value = conn
            .query_row("SELECT value FROM bot_settings WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO bot_settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    fn set_setting_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO bot_settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(inserted == 1)
    }

    fn claim_daily(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        // Single statement: SQLite serializes writers, so two racing claims
        // for the same value cannot both change a row.
        let changed = conn.execute(
            r#"
            INSERT INTO bot_settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            WHERE bot_settings.value <> excluded.value
            "#,
            params![key, value],
        )?;
        Ok(changed == 1)
    }

    fn delete_setting(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM bot_settings WHERE key = ?1", [key])?;
        Ok(())
    }
}
