use super::Database;
use crate::error::Result;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

const UPSERT_SQL: &str = "INSERT INTO drd_options (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

/// Computes the new value of a key from its current value.
pub type UpdateFn<'a> = dyn Fn(Option<String>) -> Result<String> + Send + Sync + 'a;

/// Opaque string key-value store shared by all backend nodes.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read-modify-write of one key. Must be atomic against every other
    /// writer of the shared store, not only callers in this process.
    async fn update(&self, key: &str, apply: &UpdateFn<'_>) -> Result<()>;
}

pub struct SqliteKvStore {
    db: Database,
}

impl SqliteKvStore {
    pub fn new(db: Database) -> Result<Self> {
        let store = Self { db };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS drd_options (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.connect()?;
        read_value(&conn, key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.connect()?;
        write_value(&conn, key, value)
    }

    async fn update(&self, key: &str, apply: &UpdateFn<'_>) -> Result<()> {
        let mut conn = self.db.connect()?;
        // IMMEDIATE takes the write lock before the read, so two writers
        // serialize on the database file instead of racing between read
        // and write. Contention waits on the connection busy timeout.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = read_value(&tx, key)?;
        let value = apply(current)?;
        write_value(&tx, key, &value)?;
        tx.commit()?;
        Ok(())
    }
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM drd_options WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn write_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        UPSERT_SQL,
        params![key, value, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
