//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Apply a list of statements and record the version, all or nothing.
fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: collections, queue, configuration and cache
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Records of every collection; agenda and waitlist share `agenda`
        "CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            is_waitlist INTEGER NOT NULL DEFAULT 0,
            last_modified INTEGER NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_records_view ON records(collection, is_waitlist)",
        "CREATE INDEX IF NOT EXISTS idx_records_last_modified ON records(collection, last_modified)",
        "CREATE INDEX IF NOT EXISTS idx_records_date_examen ON records(collection, json_extract(data, '$.date_examen'))",
        "CREATE INDEX IF NOT EXISTS idx_records_patronyme ON records(collection, json_extract(data, '$.patronyme'))",
        "CREATE INDEX IF NOT EXISTS idx_records_statut ON records(collection, json_extract(data, '$.statut'))",
        "CREATE INDEX IF NOT EXISTS idx_records_type_mission ON records(collection, json_extract(data, '$.type_mission'))",
        "CREATE INDEX IF NOT EXISTS idx_records_tribunal ON records(collection, json_extract(data, '$.tribunal'))",
        "CREATE INDEX IF NOT EXISTS idx_records_numero_dossier ON records(collection, json_extract(data, '$.numero_dossier'))",
        "CREATE INDEX IF NOT EXISTS idx_records_date_creation ON records(collection, json_extract(data, '$.date_creation'))",
        "CREATE INDEX IF NOT EXISTS idx_records_type_expertise ON records(collection, json_extract(data, '$.type_expertise'))",
        "CREATE INDEX IF NOT EXISTS idx_records_expertise_id ON records(collection, json_extract(data, '$.expertise_id'))",
        "CREATE INDEX IF NOT EXISTS idx_records_type_document ON records(collection, json_extract(data, '$.type_document'))",
        // Mutation queue, position is the delivery order
        "CREATE TABLE IF NOT EXISTS sync_queue (
            position INTEGER PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            priority INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            item TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status)",
        "CREATE INDEX IF NOT EXISTS idx_sync_queue_priority ON sync_queue(priority)",
        // Key-value configuration (sync metadata, metrics, app config)
        "CREATE TABLE IF NOT EXISTS configuration (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        // Expiring cache
        "CREATE TABLE IF NOT EXISTS cache (
            key TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            expires INTEGER NOT NULL,
            category TEXT NOT NULL,
            size INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache(expires)",
        "CREATE INDEX IF NOT EXISTS idx_cache_category ON cache(category)",
    ];

    apply(conn, 1, &statements)
}

/// Migration to version 2: conflict resolution log
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT NOT NULL,
            collection TEXT NOT NULL,
            local_last_modified INTEGER NOT NULL,
            remote_last_modified INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL,
            strategy TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record_id ON sync_conflicts(record_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
    ];

    apply(conn, 2, &statements)
}

/// Migration to version 3: pre-import backups
fn migrate_v3(conn: &mut Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS backups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at INTEGER NOT NULL,
            record_count INTEGER NOT NULL,
            payload TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_backups_created_at ON backups(created_at DESC)",
    ];

    apply(conn, 3, &statements)
}
