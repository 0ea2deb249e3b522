//! Pre-import backup storage

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite uses i64 for counts

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Summary of a stored backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub id: i64,
    /// Creation time (Unix ms)
    pub created_at: i64,
    pub record_count: usize,
}

/// Trait for backup storage operations
pub trait BackupRepository {
    /// Store a snapshot payload, returning the backup id
    fn insert(&self, created_at: i64, record_count: usize, payload: &Value) -> Result<i64>;

    /// List backups, newest first
    fn list(&self) -> Result<Vec<BackupInfo>>;

    /// Load the payload of a backup
    fn load(&self, id: i64) -> Result<Option<Value>>;

    /// Delete all but the newest `keep` backups
    fn evict_keeping(&self, keep: usize) -> Result<usize>;
}

/// `SQLite` implementation of `BackupRepository`
pub struct SqliteBackupRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteBackupRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl BackupRepository for SqliteBackupRepository<'_> {
    fn insert(&self, created_at: i64, record_count: usize, payload: &Value) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO backups (created_at, record_count, payload) VALUES (?1, ?2, ?3)",
            params![
                created_at,
                record_count as i64,
                serde_json::to_string(payload)?
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&self) -> Result<Vec<BackupInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created_at, record_count FROM backups ORDER BY created_at DESC, id DESC",
        )?;

        let backups = stmt
            .query_map([], |row| {
                Ok(BackupInfo {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    record_count: row.get::<_, i64>(2)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(backups)
    }

    fn load(&self, id: i64) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT payload FROM backups WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn evict_keeping(&self, keep: usize) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM backups WHERE id NOT IN (
                SELECT id FROM backups ORDER BY created_at DESC, id DESC LIMIT ?1
            )",
            [keep as i64],
        )?;
        if rows > 0 {
            tracing::debug!("Evicted {rows} old backups");
        }
        Ok(rows)
    }
}
