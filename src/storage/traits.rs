//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{CatalogEntry, CheckpointRecord, PopularitySnapshot, RunRecord, RunStatus};
use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Covers the ingestion sink (batched catalog and snapshot upserts), the
/// checkpoint store, run bookkeeping, and the read side used for statistics.
/// Every write is an insert-or-update keyed by a natural key; callers never
/// pre-check existence.
pub trait Storage {
    // ===== Ingestion =====

    /// Upserts a batch of entries and one snapshot per entry in one transaction
    ///
    /// Catalog rows are keyed by `entity_id` and overwritten last-write-wins.
    /// Snapshot rows are keyed by `(entity_id, observed_on)` and their count is
    /// overwritten. If either upsert fails, neither is applied. An empty batch
    /// is a no-op.
    ///
    /// # Returns
    ///
    /// The number of entries written
    fn upsert_batch(
        &mut self,
        entries: &[CatalogEntry],
        observed_on: NaiveDate,
    ) -> StorageResult<usize>;

    /// Gets a catalog entry by identifier
    fn get_entry(&self, entity_id: i64) -> StorageResult<Option<CatalogEntry>>;

    /// Gets the snapshot for an entry on a given day
    fn get_snapshot(
        &self,
        entity_id: i64,
        observed_on: NaiveDate,
    ) -> StorageResult<Option<PopularitySnapshot>>;

    // ===== Checkpoints =====

    /// Reads the cursor stored under `key`, or `None` if there is no checkpoint
    fn read_checkpoint(&self, key: &str) -> StorageResult<Option<String>>;

    /// Upserts the cursor for `key`, committed on its own
    fn write_checkpoint(&mut self, key: &str, cursor: &str) -> StorageResult<()>;

    /// Removes the checkpoint for `key`
    ///
    /// # Returns
    ///
    /// True if a checkpoint existed
    fn clear_checkpoint(&mut self, key: &str) -> StorageResult<bool>;

    /// Lists every stored checkpoint
    fn list_checkpoints(&self) -> StorageResult<Vec<CheckpointRecord>>;

    // ===== Run Management =====

    /// Creates a new harvest run
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, checkpoint_key: &str, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run finished with its final status and record count
    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        records_fetched: u64,
    ) -> StorageResult<()>;

    // ===== Statistics =====

    /// Counts catalog entries
    fn count_entries(&self) -> StorageResult<u64>;

    /// Counts snapshot rows
    fn count_snapshots(&self) -> StorageResult<u64>;

    /// Counts distinct observation days
    fn count_snapshot_days(&self) -> StorageResult<u64>;

    /// Gets the most common primary languages with their entry counts
    fn get_language_breakdown(&self, limit: usize) -> StorageResult<Vec<(String, u64)>>;
}
