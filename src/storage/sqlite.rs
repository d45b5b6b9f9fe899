//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::record::{Record, SourceKind};
use crate::state::PollCursor;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{CursorRecord, RunRecord, RunStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

const UPSERT_RECORD_SQL: &str = "
    INSERT INTO records (source, external_id, title, url, is_answered, size_estimate, fetched_at, first_seen_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
    ON CONFLICT(source, external_id) DO UPDATE SET
        title = excluded.title,
        url = excluded.url,
        is_answered = excluded.is_answered,
        size_estimate = excluded.size_estimate,
        fetched_at = excluded.fetched_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path` and applies the schema
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// WAL journaling is enabled so `--stats` can read while a run writes.
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn upsert_with(conn: &Connection, record: &Record) -> Result<(), rusqlite::Error> {
    conn.execute(
        UPSERT_RECORD_SQL,
        params![
            record.source.to_db_string(),
            record.external_id,
            record.title,
            record.url,
            record.is_answered,
            record.size_estimate,
            record.fetched_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn parse_timestamp(table: &'static str, value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::CorruptRow {
            table,
            message: format!("bad timestamp '{}': {}", value, e),
        })
}

fn parse_source(table: &'static str, value: &str) -> StorageResult<SourceKind> {
    SourceKind::from_db_string(value).ok_or_else(|| StorageError::CorruptRow {
        table,
        message: format!("unknown source '{}'", value),
    })
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> StorageResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(StorageError::CorruptRow {
            table: "record_embeddings",
            message: format!("vector blob of {} bytes", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

type CursorRow = (String, String, String, u32, String);

fn cursor_from_row(row: CursorRow) -> StorageResult<CursorRecord> {
    let (source_name, fingerprint, since, page, updated_at) = row;
    Ok(CursorRecord {
        source_name,
        fingerprint,
        cursor: PollCursor {
            since: parse_timestamp("poll_cursors", &since)?,
            page,
        },
        updated_at,
    })
}

impl Storage for SqliteStorage {
    // ===== Records =====

    fn upsert_record(&mut self, record: &Record) -> StorageResult<()> {
        upsert_with(&self.conn, record)?;
        Ok(())
    }

    fn upsert_records(&mut self, records: &[Record]) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        for record in records {
            upsert_with(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn get_record(&self, source: SourceKind, external_id: &str) -> StorageResult<Option<Record>> {
        let row = self
            .conn
            .query_row(
                "SELECT title, url, is_answered, size_estimate, fetched_at
                 FROM records WHERE source = ?1 AND external_id = ?2",
                params![source.to_db_string(), external_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<bool>>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((title, url, is_answered, size_estimate, fetched_at)) => Ok(Some(Record {
                source,
                external_id: external_id.to_string(),
                title,
                url,
                is_answered,
                size_estimate,
                fetched_at: parse_timestamp("records", &fetched_at)?,
            })),
        }
    }

    fn count_by_source(&self) -> StorageResult<BTreeMap<SourceKind, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, COUNT(*) FROM records GROUP BY source")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = BTreeMap::new();
        for (source, count) in rows {
            counts.insert(parse_source("records", &source)?, count as u64);
        }
        Ok(counts)
    }

    fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Cursors =====

    fn load_cursor(
        &self,
        source_name: &str,
        fingerprint: &str,
    ) -> StorageResult<Option<PollCursor>> {
        let row: Option<CursorRow> = self
            .conn
            .query_row(
                "SELECT source_name, fingerprint, since, page, updated_at
                 FROM poll_cursors WHERE source_name = ?1",
                params![source_name],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stored = cursor_from_row(row)?;
        if stored.fingerprint != fingerprint {
            tracing::info!(
                source = %source_name,
                "Source definition changed since cursor was saved, starting a fresh window"
            );
            return Ok(None);
        }

        Ok(Some(stored.cursor))
    }

    fn save_cursor(
        &mut self,
        source_name: &str,
        fingerprint: &str,
        cursor: &PollCursor,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO poll_cursors
             (source_name, fingerprint, since, page, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source_name,
                fingerprint,
                cursor.since.to_rfc3339(),
                cursor.page,
                now,
            ],
        )?;
        Ok(())
    }

    fn list_cursors(&self) -> StorageResult<Vec<CursorRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_name, fingerprint, since, page, updated_at
             FROM poll_cursors ORDER BY source_name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<Vec<CursorRow>, _>>()?;

        rows.into_iter().map(cursor_from_row).collect()
    }

    // ===== Embeddings =====

    fn save_embedding(
        &mut self,
        source: SourceKind,
        external_id: &str,
        vector: &[f32],
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO record_embeddings (source, external_id, dimension, vector)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                source.to_db_string(),
                external_id,
                vector.len() as i64,
                encode_vector(vector),
            ],
        )?;
        Ok(())
    }

    fn get_embedding(
        &self,
        source: SourceKind,
        external_id: &str,
    ) -> StorageResult<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT vector FROM record_embeddings WHERE source = ?1 AND external_id = ?2",
                params![source.to_db_string(), external_id],
                |row| row.get(0),
            )
            .optional()?;

        blob.as_deref().map(decode_vector).transpose()
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        Ok(())
    }

    fn recent_runs(&self, limit: u32) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;

        let runs = stmt
            .query_map(params![limit], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    config_hash: row.get(3)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(RunStatus::Failed),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}
