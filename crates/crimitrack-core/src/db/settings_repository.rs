//! Configuration and cache repository implementation

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite uses i64 for counts

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Well-known configuration key for the sync metadata singleton
pub const SYNC_METADATA_KEY: &str = "sync_metadata";
/// Well-known configuration key for persisted sync metrics
pub const SYNC_METRICS_KEY: &str = "sync_metrics";

/// Trait for key-value configuration storage
pub trait SettingsRepository {
    /// Read a raw JSON value
    fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Write a raw JSON value
    fn set_value(&self, key: &str, value: &Value, now: i64) -> Result<()>;

    /// Remove a key, returning whether it existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// Read and deserialize a typed value
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_value(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a typed value
    fn set_json<T: Serialize>(&self, key: &str, value: &T, now: i64) -> Result<()> {
        self.set_value(key, &serde_json::to_value(value)?, now)
    }
}

/// Trait for the expiring cache
pub trait CacheRepository {
    /// Store data until `expires` (Unix ms)
    fn put(&self, key: &str, data: &Value, expires: i64, category: &str) -> Result<()>;

    /// Get data that has not expired at `now`
    fn get(&self, key: &str, now: i64) -> Result<Option<Value>>;

    /// Delete every entry expired at `now`
    fn purge_expired(&self, now: i64) -> Result<usize>;
}

/// `SQLite` implementation of `SettingsRepository` and `CacheRepository`
pub struct SqliteSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SettingsRepository for SqliteSettingsRepository<'_> {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM configuration WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_value(&self, key: &str, value: &Value, now: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO configuration (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, serde_json::to_string(value)?, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM configuration WHERE key = ?1", [key])?;
        Ok(rows > 0)
    }
}

impl CacheRepository for SqliteSettingsRepository<'_> {
    fn put(&self, key: &str, data: &Value, expires: i64, category: &str) -> Result<()> {
        let data = serde_json::to_string(data)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO cache (key, data, expires, category, size)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, data, expires, category, data.len() as i64],
        )?;
        Ok(())
    }

    fn get(&self, key: &str, now: i64) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM cache WHERE key = ?1 AND expires > ?2",
                params![key, now],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn purge_expired(&self, now: i64) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM cache WHERE expires <= ?1", [now])?;
        if rows > 0 {
            tracing::debug!("Purged {rows} expired cache entries");
        }
        Ok(rows)
    }
}

/// Cache category inferred from the key.
pub fn cache_category(key: &str) -> &'static str {
    let key = key.to_ascii_lowercase();
    if key.contains("expertise") {
        "expertise"
    } else if key.contains("agenda") {
        "agenda"
    } else if key.contains("stat") {
        "statistics"
    } else {
        "other"
    }
}
