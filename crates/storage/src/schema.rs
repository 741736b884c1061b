use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, unixepoch())",
        rusqlite::params![SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS base_records (
    device_id TEXT PRIMARY KEY,
    group_id TEXT NOT NULL,
    vendor TEXT,
    model TEXT,
    category TEXT,
    attributes BLOB NOT NULL,
    loaded_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_base_group ON base_records (group_id);

CREATE TABLE IF NOT EXISTS override_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    field_name TEXT NOT NULL,
    new_value TEXT NOT NULL,
    is_validated INTEGER NOT NULL DEFAULT 0 CHECK (is_validated IN (0, 1)),
    scope TEXT NOT NULL CHECK (scope IN ('device', 'group')),
    changed_at INTEGER NOT NULL,
    editor_id TEXT NOT NULL,
    editor_name TEXT NOT NULL,
    note TEXT,
    previous_value TEXT,
    checksum BLOB NOT NULL CHECK (length(checksum) = 32)
);
CREATE INDEX IF NOT EXISTS idx_override_device ON override_log (device_id, field_name);
CREATE INDEX IF NOT EXISTS idx_override_group ON override_log (group_id, field_name) WHERE scope = 'group';
CREATE INDEX IF NOT EXISTS idx_override_changed ON override_log (changed_at, id);
";
