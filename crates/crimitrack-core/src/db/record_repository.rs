//! Record repository implementation

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)] // SQLite uses i64 for counts

use crate::error::{Error, Result};
use crate::models::{Collection, Record, RecordId};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

/// Trait for record storage operations
pub trait RecordRepository {
    /// Insert or replace a record by identifier
    fn upsert(&self, record: &Record) -> Result<()>;

    /// Get a record by ID
    fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>>;

    /// List every record of a collection in insertion order
    fn list(&self, collection: Collection) -> Result<Vec<Record>>;

    /// Exact-match lookup on an indexed attribute
    fn list_by_index(&self, collection: Collection, index: &str, value: &Value)
        -> Result<Vec<Record>>;

    /// Delete a record, returning whether it existed
    fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool>;

    /// Remove every record of a collection, returning how many were removed
    fn clear(&self, collection: Collection) -> Result<usize>;

    /// Count records of a collection
    fn count(&self, collection: Collection) -> Result<usize>;

    /// Most recent modification time across a collection
    fn latest_modification(&self, collection: Collection) -> Result<Option<i64>>;

    /// Delete records whose `field` (or `_lastModified` when `None`) is older
    /// than the cutoff
    fn prune_before(
        &self,
        collection: Collection,
        field: Option<&str>,
        cutoff: &SqlValue,
    ) -> Result<usize>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let collection: String = row.get(0)?;
        let id: String = row.get(1)?;
        let is_waitlist: bool = row.get::<_, i32>(2)? != 0;
        let last_modified: i64 = row.get(3)?;
        let data: String = row.get(4)?;

        let fields: Map<String, Value> = serde_json::from_str(&data).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(error))
        })?;
        let collection = match collection.parse::<Collection>() {
            Ok(Collection::Agenda) if is_waitlist => Collection::Waitlist,
            Ok(collection) => collection,
            Err(error) => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                ))
            }
        };

        Ok(Record {
            id: RecordId::from(id),
            collection,
            last_modified,
            fields,
        })
    }

    fn json_to_sql(value: &Value) -> Result<SqlValue> {
        match value {
            Value::String(text) => Ok(SqlValue::Text(text.clone())),
            Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
            Value::Number(number) => number.as_i64().map_or_else(
                || {
                    number
                        .as_f64()
                        .map(SqlValue::Real)
                        .ok_or_else(|| Error::InvalidInput(format!("unsupported number {number}")))
                },
                |integer| Ok(SqlValue::Integer(integer)),
            ),
            other => Err(Error::InvalidInput(format!(
                "index lookups need a scalar value, got {other}"
            ))),
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT collection, id, is_waitlist, last_modified, data FROM records";

impl RecordRepository for SqliteRecordRepository<'_> {
    fn upsert(&self, record: &Record) -> Result<()> {
        let data = serde_json::to_string(&record.fields)?;
        self.conn.execute(
            "INSERT INTO records (collection, id, is_waitlist, last_modified, data)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(collection, id) DO UPDATE SET
                is_waitlist = excluded.is_waitlist,
                last_modified = excluded.last_modified,
                data = excluded.data",
            params![
                record.collection.storage_name(),
                record.id.as_str(),
                i32::from(record.collection.is_waitlist()),
                record.last_modified,
                data
            ],
        )?;
        Ok(())
    }

    fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE collection = ?1 AND is_waitlist = ?2 AND id = ?3"),
                params![
                    collection.storage_name(),
                    i32::from(collection.is_waitlist()),
                    id.as_str()
                ],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn list(&self, collection: Collection) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE collection = ?1 AND is_waitlist = ?2 ORDER BY rowid"
        ))?;

        let records = stmt
            .query_map(
                params![collection.storage_name(), i32::from(collection.is_waitlist())],
                Self::parse_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn list_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>> {
        if !collection.has_index(index) {
            return Err(Error::InvalidInput(format!(
                "collection {collection} has no index '{index}'"
            )));
        }
        let value = Self::json_to_sql(value)?;

        // `index` comes from a fixed whitelist, so it is safe to splice in
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE collection = ?1 AND is_waitlist = ?2
               AND json_extract(data, '$.{index}') = ?3
             ORDER BY rowid"
        ))?;

        let records = stmt
            .query_map(
                params![
                    collection.storage_name(),
                    i32::from(collection.is_waitlist()),
                    value
                ],
                Self::parse_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND is_waitlist = ?2 AND id = ?3",
            params![
                collection.storage_name(),
                i32::from(collection.is_waitlist()),
                id.as_str()
            ],
        )?;
        Ok(rows > 0)
    }

    fn clear(&self, collection: Collection) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND is_waitlist = ?2",
            params![collection.storage_name(), i32::from(collection.is_waitlist())],
        )?;
        Ok(rows)
    }

    fn count(&self, collection: Collection) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1 AND is_waitlist = ?2",
            params![collection.storage_name(), i32::from(collection.is_waitlist())],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn latest_modification(&self, collection: Collection) -> Result<Option<i64>> {
        let latest: Option<i64> = self.conn.query_row(
            "SELECT MAX(last_modified) FROM records WHERE collection = ?1 AND is_waitlist = ?2",
            params![collection.storage_name(), i32::from(collection.is_waitlist())],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    fn prune_before(
        &self,
        collection: Collection,
        field: Option<&str>,
        cutoff: &SqlValue,
    ) -> Result<usize> {
        let column = match field {
            None => "last_modified".to_string(),
            Some(field) if collection.has_index(field) => {
                format!("json_extract(data, '$.{field}')")
            }
            Some(field) => {
                return Err(Error::InvalidInput(format!(
                    "collection {collection} has no index '{field}'"
                )))
            }
        };

        let rows = self.conn.execute(
            &format!(
                "DELETE FROM records
                 WHERE collection = ?1 AND is_waitlist = ?2 AND {column} < ?3"
            ),
            params![
                collection.storage_name(),
                i32::from(collection.is_waitlist()),
                cutoff
            ],
        )?;
        Ok(rows)
    }
}
