//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Poll-Ingest database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track ingest process runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Normalized records, one row per (source, external_id)
CREATE TABLE IF NOT EXISTS records (
    source TEXT NOT NULL,
    external_id TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    is_answered INTEGER,
    size_estimate REAL NOT NULL,
    fetched_at TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    PRIMARY KEY (source, external_id)
);

CREATE INDEX IF NOT EXISTS idx_records_fetched_at ON records(fetched_at);

-- Durable poll cursors, keyed by configured source name
CREATE TABLE IF NOT EXISTS poll_cursors (
    source_name TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    since TEXT NOT NULL,
    page INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

-- Optional vectors produced by an embedder
CREATE TABLE IF NOT EXISTS record_embeddings (
    source TEXT NOT NULL,
    external_id TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    PRIMARY KEY (source, external_id)
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
