//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    CatalogEntry, CheckpointRecord, PopularitySnapshot, RunRecord, RunStatus,
};
use crate::HarvestError;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const UPSERT_ENTRY_SQL: &str = "
    INSERT INTO catalog_entries (entity_id, node_id, owner, name, full_name, url,
        description, language, popularity, last_modified_at, last_crawled_at, updated_local_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
    ON CONFLICT(entity_id) DO UPDATE SET
        node_id = excluded.node_id,
        owner = excluded.owner,
        name = excluded.name,
        full_name = excluded.full_name,
        url = excluded.url,
        description = excluded.description,
        language = excluded.language,
        popularity = excluded.popularity,
        last_modified_at = excluded.last_modified_at,
        last_crawled_at = excluded.last_crawled_at,
        updated_local_at = excluded.updated_local_at";

const UPSERT_SNAPSHOT_SQL: &str = "
    INSERT INTO popularity_snapshots (entity_id, observed_on, popularity)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(entity_id, observed_on) DO UPDATE SET
        popularity = excluded.popularity";

const ENTRY_COLUMNS: &str = "entity_id, node_id, owner, name, full_name, url, description,
    language, popularity, last_modified_at";

const RUN_COLUMNS: &str =
    "id, checkpoint_key, started_at, finished_at, config_hash, status, records_fetched";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(HarvestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, HarvestError> {
        let conn = Connection::open(path)?;

        // External readers may query while a harvest is running
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self, HarvestError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let last_modified: Option<String> = row.get(9)?;
    Ok(CatalogEntry {
        entity_id: row.get(0)?,
        node_id: row.get(1)?,
        owner: row.get(2)?,
        name: row.get(3)?,
        full_name: row.get(4)?,
        url: row.get(5)?,
        description: row.get(6)?,
        language: row.get(7)?,
        popularity: row.get::<_, i64>(8)?.max(0) as u64,
        last_modified: last_modified
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        checkpoint_key: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
            .unwrap_or(RunStatus::Running),
        records_fetched: row.get::<_, i64>(6)?.max(0) as u64,
    })
}

fn to_sql_count(value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("count {} does not fit in i64", value)))
}

impl Storage for SqliteStorage {
    // ===== Ingestion =====

    fn upsert_batch(
        &mut self,
        entries: &[CatalogEntry],
        observed_on: NaiveDate,
    ) -> StorageResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let day = observed_on.to_string();

        // Dropping the transaction without commit rolls back both tables
        let tx = self.conn.transaction()?;
        {
            let mut entry_stmt = tx.prepare_cached(UPSERT_ENTRY_SQL)?;
            for entry in entries {
                entry_stmt.execute(params![
                    entry.entity_id,
                    entry.node_id,
                    entry.owner,
                    entry.name,
                    entry.full_name,
                    entry.url,
                    entry.description,
                    entry.language,
                    to_sql_count(entry.popularity)?,
                    entry.last_modified.map(|dt| dt.to_rfc3339()),
                    now,
                ])?;
            }

            let mut snapshot_stmt = tx.prepare_cached(UPSERT_SNAPSHOT_SQL)?;
            for entry in entries {
                snapshot_stmt.execute(params![
                    entry.entity_id,
                    day,
                    to_sql_count(entry.popularity)?,
                ])?;
            }
        }
        tx.commit()?;

        Ok(entries.len())
    }

    fn get_entry(&self, entity_id: i64) -> StorageResult<Option<CatalogEntry>> {
        let sql = format!(
            "SELECT {} FROM catalog_entries WHERE entity_id = ?1",
            ENTRY_COLUMNS
        );
        let entry = self
            .conn
            .query_row(&sql, params![entity_id], entry_from_row)
            .optional()?;
        Ok(entry)
    }

    fn get_snapshot(
        &self,
        entity_id: i64,
        observed_on: NaiveDate,
    ) -> StorageResult<Option<PopularitySnapshot>> {
        let popularity: Option<i64> = self
            .conn
            .query_row(
                "SELECT popularity FROM popularity_snapshots WHERE entity_id = ?1 AND observed_on = ?2",
                params![entity_id, observed_on.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(popularity.map(|count| PopularitySnapshot {
            entity_id,
            observed_on,
            popularity: count.max(0) as u64,
        }))
    }

    // ===== Checkpoints =====

    fn read_checkpoint(&self, key: &str) -> StorageResult<Option<String>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT checkpoint_value FROM crawl_checkpoints WHERE checkpoint_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    fn write_checkpoint(&mut self, key: &str, cursor: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO crawl_checkpoints (checkpoint_key, checkpoint_value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(checkpoint_key) DO UPDATE SET
                checkpoint_value = excluded.checkpoint_value,
                updated_at = excluded.updated_at",
            params![key, cursor, now],
        )?;
        Ok(())
    }

    fn clear_checkpoint(&mut self, key: &str) -> StorageResult<bool> {
        let removed = self.conn.execute(
            "DELETE FROM crawl_checkpoints WHERE checkpoint_key = ?1",
            params![key],
        )?;
        Ok(removed > 0)
    }

    fn list_checkpoints(&self) -> StorageResult<Vec<CheckpointRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT checkpoint_key, checkpoint_value, updated_at
             FROM crawl_checkpoints ORDER BY checkpoint_key",
        )?;

        let checkpoints = stmt
            .query_map([], |row| {
                Ok(CheckpointRecord {
                    key: row.get(0)?,
                    cursor: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(checkpoints)
    }

    // ===== Run Management =====

    fn create_run(&mut self, checkpoint_key: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO harvest_runs (checkpoint_key, started_at, config_hash, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                checkpoint_key,
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let sql = format!("SELECT {} FROM harvest_runs WHERE id = ?1", RUN_COLUMNS);
        self.conn
            .query_row(&sql, params![run_id], run_from_row)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let sql = format!(
            "SELECT {} FROM harvest_runs ORDER BY id DESC LIMIT 1",
            RUN_COLUMNS
        );
        let run = self.conn.query_row(&sql, [], run_from_row).optional()?;
        Ok(run)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        records_fetched: u64,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE harvest_runs SET status = ?1, finished_at = ?2, records_fetched = ?3
             WHERE id = ?4",
            params![
                status.to_db_string(),
                now,
                to_sql_count(records_fetched)?,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Statistics =====

    fn count_entries(&self) -> StorageResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM catalog_entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_snapshots(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM popularity_snapshots",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_snapshot_days(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT observed_on) FROM popularity_snapshots",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_language_breakdown(&self, limit: usize) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT language, COUNT(*) AS count FROM catalog_entries
             WHERE language IS NOT NULL
             GROUP BY language ORDER BY count DESC, language ASC LIMIT ?1",
        )?;

        let languages = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(languages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(entity_id: i64, popularity: u64) -> CatalogEntry {
        CatalogEntry {
            entity_id,
            node_id: Some(format!("R_{}", entity_id)),
            owner: "octo".to_string(),
            name: format!("repo-{}", entity_id),
            full_name: format!("octo/repo-{}", entity_id),
            url: format!("https://github.com/octo/repo-{}", entity_id),
            description: None,
            language: Some("Rust".to_string()),
            popularity,
            last_modified: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn test_create_in_memory() {
        let storage = SqliteStorage::new_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_upsert_batch_writes_entries_and_snapshots() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let written = storage
            .upsert_batch(&[entry(1, 10), entry(2, 20)], day(1))
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(storage.count_entries().unwrap(), 2);
        assert_eq!(storage.count_snapshots().unwrap(), 2);

        let stored = storage.get_entry(1).unwrap().unwrap();
        assert_eq!(stored, entry(1, 10));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert_eq!(storage.upsert_batch(&[], day(1)).unwrap(), 0);
        assert_eq!(storage.count_entries().unwrap(), 0);
    }

    #[test]
    fn test_ingesting_same_batch_twice_is_idempotent() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let batch = vec![entry(1, 10), entry(2, 20), entry(3, 30)];

        storage.upsert_batch(&batch, day(1)).unwrap();
        storage.upsert_batch(&batch, day(1)).unwrap();

        assert_eq!(storage.count_entries().unwrap(), 3);
        assert_eq!(storage.count_snapshots().unwrap(), 3);
        for e in &batch {
            assert_eq!(storage.get_entry(e.entity_id).unwrap().as_ref(), Some(e));
            let snapshot = storage.get_snapshot(e.entity_id, day(1)).unwrap().unwrap();
            assert_eq!(snapshot.popularity, e.popularity);
        }
    }

    #[test]
    fn test_same_day_snapshot_is_overwritten() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        for count in [5, 9, 7] {
            storage.upsert_batch(&[entry(42, count)], day(3)).unwrap();
        }

        assert_eq!(storage.count_snapshots().unwrap(), 1);
        let snapshot = storage.get_snapshot(42, day(3)).unwrap().unwrap();
        assert_eq!(snapshot.popularity, 7);
        assert_eq!(storage.get_entry(42).unwrap().unwrap().popularity, 7);
    }

    #[test]
    fn test_new_day_adds_snapshot() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.upsert_batch(&[entry(1, 10)], day(1)).unwrap();
        storage.upsert_batch(&[entry(1, 15)], day(2)).unwrap();

        assert_eq!(storage.count_entries().unwrap(), 1);
        assert_eq!(storage.count_snapshots().unwrap(), 2);
        assert_eq!(storage.count_snapshot_days().unwrap(), 2);
        assert_eq!(storage.get_snapshot(1, day(1)).unwrap().unwrap().popularity, 10);
    }

    #[test]
    fn test_upsert_overwrites_mutable_fields() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.upsert_batch(&[entry(1, 10)], day(1)).unwrap();

        let mut renamed = entry(1, 11);
        renamed.owner = "new-owner".to_string();
        renamed.full_name = "new-owner/repo-1".to_string();
        renamed.description = Some("moved".to_string());
        renamed.language = None;
        storage.upsert_batch(&[renamed.clone()], day(1)).unwrap();

        assert_eq!(storage.get_entry(1).unwrap(), Some(renamed));
    }

    #[test]
    fn test_failed_snapshot_rolls_back_catalog_rows() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .conn
            .execute_batch(
                "CREATE TRIGGER reject_snapshot BEFORE INSERT ON popularity_snapshots
                 WHEN NEW.entity_id = 99
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = storage.upsert_batch(&[entry(1, 10), entry(99, 20)], day(1));

        assert!(matches!(result, Err(StorageError::Sqlite(_))));
        assert_eq!(storage.count_entries().unwrap(), 0);
        assert_eq!(storage.count_snapshots().unwrap(), 0);
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert_eq!(storage.read_checkpoint("main").unwrap(), None);

        storage.write_checkpoint("main", "cursor-1").unwrap();
        storage.write_checkpoint("main", "cursor-2").unwrap();
        storage.write_checkpoint("other", "cursor-x").unwrap();

        assert_eq!(
            storage.read_checkpoint("main").unwrap(),
            Some("cursor-2".to_string())
        );
        let all = storage.list_checkpoints().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "main");
    }

    #[test]
    fn test_clear_checkpoint() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage.write_checkpoint("main", "cursor-1").unwrap();

        assert!(storage.clear_checkpoint("main").unwrap());
        assert!(!storage.clear_checkpoint("main").unwrap());
        assert_eq!(storage.read_checkpoint("main").unwrap(), None);
    }

    #[test]
    fn test_run_lifecycle() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("main", "hash").unwrap();
        assert!(run_id > 0);

        let run = storage.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());

        storage
            .finish_run(run_id, RunStatus::Completed, 250)
            .unwrap();
        let run = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.records_fetched, 250);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_unknown_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        assert!(matches!(
            storage.get_run(7),
            Err(StorageError::RunNotFound(7))
        ));
        assert!(storage.finish_run(7, RunStatus::Failed, 0).is_err());
    }

    #[test]
    fn test_language_breakdown() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let mut go = entry(3, 1);
        go.language = Some("Go".to_string());
        let mut unknown = entry(4, 1);
        unknown.language = None;

        storage
            .upsert_batch(&[entry(1, 1), entry(2, 1), go, unknown], day(1))
            .unwrap();

        let breakdown = storage.get_language_breakdown(10).unwrap();
        assert_eq!(
            breakdown,
            vec![("Rust".to_string(), 2), ("Go".to_string(), 1)]
        );
    }
}
