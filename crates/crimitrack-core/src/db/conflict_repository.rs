//! Conflict log repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for limits

use crate::error::Result;
use crate::models::{ResolutionStrategy, SyncConflict};
use rusqlite::{params, Connection};

/// Trait for conflict log operations
pub trait ConflictRepository {
    /// Record a resolved conflict, returning the log row id
    fn record(
        &self,
        record_id: &str,
        collection: &str,
        local_last_modified: i64,
        remote_last_modified: i64,
        resolved_at: i64,
        strategy: ResolutionStrategy,
    ) -> Result<i64>;

    /// List recently resolved conflicts, newest first
    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn record(
        &self,
        record_id: &str,
        collection: &str,
        local_last_modified: i64,
        remote_last_modified: i64,
        resolved_at: i64,
        strategy: ResolutionStrategy,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (
                record_id,
                collection,
                local_last_modified,
                remote_last_modified,
                resolved_at,
                strategy
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record_id,
                collection,
                local_last_modified,
                remote_last_modified,
                resolved_at,
                strategy.as_str()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_id, collection, local_last_modified, remote_last_modified,
                    resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?1",
        )?;

        let conflicts = stmt
            .query_map([limit as i64], |row| {
                Ok(SyncConflict {
                    id: row.get(0)?,
                    record_id: row.get(1)?,
                    collection: row.get(2)?,
                    local_last_modified: row.get(3)?,
                    remote_last_modified: row.get(4)?,
                    resolved_at: row.get(5)?,
                    strategy: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }
}
