//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the harvest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS harvest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    checkpoint_key TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    records_fetched INTEGER NOT NULL DEFAULT 0
);

-- One row per upstream repository
CREATE TABLE IF NOT EXISTS catalog_entries (
    entity_id INTEGER PRIMARY KEY,
    node_id TEXT,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    full_name TEXT NOT NULL,
    url TEXT NOT NULL,
    description TEXT,
    language TEXT,
    popularity INTEGER NOT NULL DEFAULT 0,
    last_modified_at TEXT,
    last_crawled_at TEXT NOT NULL,
    updated_local_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_catalog_full_name ON catalog_entries(full_name);
CREATE INDEX IF NOT EXISTS idx_catalog_language ON catalog_entries(language);

-- One popularity observation per entry per day
CREATE TABLE IF NOT EXISTS popularity_snapshots (
    entity_id INTEGER NOT NULL REFERENCES catalog_entries(entity_id),
    observed_on TEXT NOT NULL,
    popularity INTEGER NOT NULL,
    PRIMARY KEY (entity_id, observed_on)
);

CREATE INDEX IF NOT EXISTS idx_snapshots_day ON popularity_snapshots(observed_on);

-- Resumable pagination positions
CREATE TABLE IF NOT EXISTS crawl_checkpoints (
    checkpoint_key TEXT PRIMARY KEY,
    checkpoint_value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
