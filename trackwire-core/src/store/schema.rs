//! Store schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- General scope: queue blob, app-version bookkeeping, feature flags
    CREATE TABLE IF NOT EXISTS kv_general (
        key        TEXT PRIMARY KEY,
        kind       TEXT NOT NULL,
        text_value TEXT,
        real_value REAL,
        int_value  INTEGER,
        blob_value BLOB,
        updated_at DATETIME NOT NULL
    );

    -- Sensitive scope: identifiers and credentials. Same access pattern,
    -- separate table so the host can protect it differently.
    CREATE TABLE IF NOT EXISTS kv_sensitive (
        key        TEXT PRIMARY KEY,
        kind       TEXT NOT NULL,
        text_value TEXT,
        real_value REAL,
        int_value  INTEGER,
        blob_value BLOB,
        updated_at DATETIME NOT NULL
    );
    "#,
];

/// Run any outstanding migrations on this connection
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking store migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running store migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version of a connection
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
