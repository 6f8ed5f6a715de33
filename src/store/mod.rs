//! Durable key-value store
//!
//! The engine persists every snapshot (queue, retry metadata, sync metadata,
//! cached documents) through the [`KeyValueStore`] trait so the embedding
//! application decides where state lives. Two implementations ship with the
//! crate:
//! - `SqliteStore`: a single `kv` table behind an r2d2 connection pool
//! - `MemoryStore`: HashMap-backed, for tests and ephemeral sessions

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

// Connection pooling
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Store error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Store poisoned: {0}")]
    Poisoned(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Scoped durable string storage. Values survive process restarts
/// (except for `MemoryStore`). Keys are stable across versions; the
/// engine relies on that for restart recovery.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn remove(&self, key: &str) -> StoreResult<()>;
    async fn clear(&self) -> StoreResult<()>;
}

// ============================================================================
// SQLite-backed store
// ============================================================================

/// SQLite-backed store: one `kv` table, pooled connections.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn new(path: PathBuf) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path);
        Self::with_manager(manager)
    }

    /// In-memory SQLite store, mainly for tests.
    pub fn in_memory() -> StoreResult<Self> {
        // Single connection so every caller sees the same :memory: database.
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn with_manager(manager: SqliteConnectionManager) -> StoreResult<Self> {
        let pool = Pool::builder().max_size(4).build(manager)?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3
            "#,
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM kv", params![])?;
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// HashMap-backed store. Does not survive restarts; used by tests and by
/// callers that want a throwaway engine.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.lock()?.clear();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
