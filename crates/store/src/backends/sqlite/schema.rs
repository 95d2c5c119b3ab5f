//! SQLite schema definitions.

use rusqlite::Connection;

use crate::error::StorageResult;

use super::backend::internal_error;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
        tracing::info!("Initialized SQLite schema version {}", SCHEMA_VERSION);
    } else if current_version > SCHEMA_VERSION {
        return Err(internal_error(format!(
            "Database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> StorageResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| internal_error(format!("Failed to create schema_version table: {}", e)))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| internal_error(format!("Failed to clear schema_version: {}", e)))?;

    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| internal_error(format!("Failed to set schema_version: {}", e)))?;

    Ok(())
}

fn create_table(conn: &Connection, name: &str, sql: &str) -> StorageResult<()> {
    conn.execute_batch(sql)
        .map_err(|e| internal_error(format!("Failed to create {} table: {}", name, e)))
}

/// Create the initial schema (version 1).
fn create_schema_v1(conn: &Connection) -> StorageResult<()> {
    // Current version of every resource, tombstones included
    create_table(
        conn,
        "resources",
        "CREATE TABLE IF NOT EXISTS resources (
            logical_id TEXT PRIMARY KEY,
            resource_type TEXT NOT NULL,
            forced_id TEXT,
            version INTEGER NOT NULL,
            data BLOB NOT NULL,
            created_at TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            last_updated_ms INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_resources_type_updated
            ON resources(resource_type, is_deleted, last_updated_ms, logical_id);",
    )?;

    create_table(
        conn,
        "forced_ids",
        "CREATE TABLE IF NOT EXISTS forced_ids (
            resource_type TEXT NOT NULL,
            forced_id TEXT NOT NULL,
            logical_id TEXT NOT NULL,
            PRIMARY KEY (resource_type, forced_id)
        );
        CREATE INDEX IF NOT EXISTS idx_forced_ids_logical ON forced_ids(logical_id);",
    )?;

    // Immutable version snapshots
    create_table(
        conn,
        "resource_history",
        "CREATE TABLE IF NOT EXISTS resource_history (
            logical_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            resource_type TEXT NOT NULL,
            data BLOB NOT NULL,
            last_updated TEXT NOT NULL,
            method TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (logical_id, version)
        );",
    )?;

    create_table(
        conn,
        "idx_string",
        "CREATE TABLE IF NOT EXISTS idx_string (
            logical_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            value_normalized TEXT NOT NULL,
            value_exact TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_string_lookup
            ON idx_string(resource_type, param_name, value_normalized);
        CREATE INDEX IF NOT EXISTS idx_string_resource ON idx_string(logical_id);",
    )?;

    create_table(
        conn,
        "idx_token",
        "CREATE TABLE IF NOT EXISTS idx_token (
            logical_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            system TEXT,
            code TEXT NOT NULL,
            display TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_token_lookup
            ON idx_token(resource_type, param_name, code, system);
        CREATE INDEX IF NOT EXISTS idx_token_resource ON idx_token(logical_id);",
    )?;

    create_table(
        conn,
        "idx_number",
        "CREATE TABLE IF NOT EXISTS idx_number (
            logical_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            value REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_number_lookup
            ON idx_number(resource_type, param_name, value);
        CREATE INDEX IF NOT EXISTS idx_number_resource ON idx_number(logical_id);",
    )?;

    create_table(
        conn,
        "idx_quantity",
        "CREATE TABLE IF NOT EXISTS idx_quantity (
            logical_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            value REAL NOT NULL,
            system TEXT,
            code TEXT,
            unit TEXT,
            canonical_value REAL,
            canonical_code TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_quantity_lookup
            ON idx_quantity(resource_type, param_name, value);
        CREATE INDEX IF NOT EXISTS idx_quantity_resource ON idx_quantity(logical_id);",
    )?;

    create_table(
        conn,
        "idx_date",
        "CREATE TABLE IF NOT EXISTS idx_date (
            logical_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            start_ms INTEGER NOT NULL,
            end_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_date_lookup
            ON idx_date(resource_type, param_name, start_ms, end_ms);
        CREATE INDEX IF NOT EXISTS idx_date_resource ON idx_date(logical_id);",
    )?;

    create_table(
        conn,
        "idx_uri",
        "CREATE TABLE IF NOT EXISTS idx_uri (
            logical_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            value TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_uri_lookup ON idx_uri(resource_type, param_name, value);
        CREATE INDEX IF NOT EXISTS idx_uri_resource ON idx_uri(logical_id);",
    )?;

    create_table(
        conn,
        "idx_coords",
        "CREATE TABLE IF NOT EXISTS idx_coords (
            logical_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            param_name TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_coords_lookup
            ON idx_coords(resource_type, param_name, latitude, longitude);
        CREATE INDEX IF NOT EXISTS idx_coords_resource ON idx_coords(logical_id);",
    )?;

    // Outbound references of each current version
    create_table(
        conn,
        "resource_links",
        "CREATE TABLE IF NOT EXISTS resource_links (
            source_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            source_path TEXT NOT NULL,
            target_type TEXT,
            target_id TEXT,
            target_uri TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_links_source ON resource_links(source_id);
        CREATE INDEX IF NOT EXISTS idx_links_target ON resource_links(target_id);
        CREATE INDEX IF NOT EXISTS idx_links_path
            ON resource_links(source_type, source_path, target_id);",
    )?;

    create_table(
        conn,
        "tag_definitions",
        "CREATE TABLE IF NOT EXISTS tag_definitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scheme TEXT NOT NULL,
            system TEXT NOT NULL DEFAULT '',
            code TEXT NOT NULL DEFAULT '',
            display TEXT NOT NULL DEFAULT '',
            UNIQUE (scheme, system, code, display)
        );",
    )?;

    create_table(
        conn,
        "resource_tags",
        "CREATE TABLE IF NOT EXISTS resource_tags (
            logical_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            tag_id INTEGER NOT NULL REFERENCES tag_definitions(id),
            PRIMARY KEY (logical_id, version, tag_id)
        );",
    )?;

    Ok(())
}
