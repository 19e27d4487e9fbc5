//! Per-device persistent state.
//!
//! SYSTEM CONTEXT
//! ==============
//! A small SQLite key/value table remembers identity (`session_id`,
//! `client_id`), the last known elapsed time, leadership history, and the
//! timer configuration across restarts. It is read once at startup and
//! written on change; hot-path writers spawn fire-and-forget tasks so timer
//! handling never blocks on disk I/O.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::message::now_ms;

pub const KEY_SESSION_ID: &str = "session_id";
pub const KEY_CLIENT_ID: &str = "client_id";
pub const KEY_GLOBAL_TIME: &str = "global_time";
pub const KEY_WAS_LEADER: &str = "was_leader";
pub const KEY_LEADER_SINCE: &str = "leader_since";
pub const KEY_TIMERS: &str = "timers";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Handle to the device store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct DeviceStore {
    pool: SqlitePool,
}

impl DeviceStore {
    /// Open (or create) the store at `path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns a database error if the file cannot be opened or the schema
    /// cannot be created.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        Self::init(pool).await
    }

    /// Open an in-memory store. Used by tests and the demo binary when no
    /// path is configured.
    ///
    /// # Errors
    ///
    /// Returns a database error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // One connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS device_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Read one value.
    ///
    /// # Errors
    ///
    /// Returns a database error if the query fails.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM device_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    /// Write one value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    pub async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO device_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove one value.
    ///
    /// # Errors
    ///
    /// Returns a database error if the delete fails.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM device_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load the persisted `(session_id, client_id)` pair, generating and
    /// persisting fresh random tokens on first use.
    ///
    /// # Errors
    ///
    /// Returns a database error if reads or writes fail.
    pub async fn load_or_create_identity(&self) -> Result<(String, String), StoreError> {
        let session_id = match self.get(KEY_SESSION_ID).await? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                self.put(KEY_SESSION_ID, &id).await?;
                id
            }
        };
        let client_id = match self.get(KEY_CLIENT_ID).await? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                self.put(KEY_CLIENT_ID, &id).await?;
                id
            }
        };
        Ok((session_id, client_id))
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
