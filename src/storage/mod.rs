//! Storage module for persisting harvested data
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Atomic batched upserts of catalog entries and popularity snapshots
//! - Checkpoint persistence for resumption
//! - Harvest run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::HarvestError;

use chrono::{DateTime, NaiveDate, Utc};
use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(HarvestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, HarvestError> {
    SqliteStorage::new(path)
}

/// Canonical record for one repository in the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Stable numeric identifier assigned upstream
    pub entity_id: i64,
    /// Opaque upstream node identifier
    pub node_id: Option<String>,
    pub owner: String,
    pub name: String,
    /// `owner/name`
    pub full_name: String,
    pub url: String,
    /// `None` means unknown, which is distinct from an empty description
    pub description: Option<String>,
    pub language: Option<String>,
    pub popularity: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// A dated observation of an entry's popularity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularitySnapshot {
    pub entity_id: i64,
    pub observed_on: NaiveDate,
    pub popularity: u64,
}

/// Persisted pagination position
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub key: String,
    pub cursor: String,
    pub updated_at: String,
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub checkpoint_key: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub records_fetched: u64,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
