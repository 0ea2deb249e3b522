//! Mutation queue persistence

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite uses i64 for counts

use crate::error::Result;
use crate::models::{MutationQueueItem, QueueStatus};
use rusqlite::{params, Connection};

/// Trait for queue storage operations
pub trait QueueRepository {
    /// Load the whole queue in delivery order
    fn load(&self) -> Result<Vec<MutationQueueItem>>;

    /// Replace the whole queue, keeping the given order
    fn replace_all(&self, items: &[MutationQueueItem]) -> Result<()>;

    /// Count items with the given status
    fn count_status(&self, status: QueueStatus) -> Result<usize>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn load(&self) -> Result<Vec<MutationQueueItem>> {
        let mut stmt = self
            .conn
            .prepare("SELECT item FROM sync_queue ORDER BY position")?;

        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut items = Vec::with_capacity(raw.len());
        for json in raw {
            items.push(serde_json::from_str(&json)?);
        }
        Ok(items)
    }

    fn replace_all(&self, items: &[MutationQueueItem]) -> Result<()> {
        self.conn.execute("DELETE FROM sync_queue", [])?;

        let mut stmt = self.conn.prepare(
            "INSERT INTO sync_queue (position, id, priority, timestamp, status, attempts, item)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for (position, item) in items.iter().enumerate() {
            stmt.execute(params![
                position as i64,
                item.id,
                u8::from(item.priority),
                item.timestamp,
                item.status.as_str(),
                item.attempts,
                serde_json::to_string(item)?
            ])?;
        }

        tracing::debug!("Persisted {} queue items", items.len());
        Ok(())
    }

    fn count_status(&self, status: QueueStatus) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status = ?1",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
