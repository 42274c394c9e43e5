//! Statistics generation from the catalog database
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer.

use crate::storage::{CheckpointRecord, RunRecord, Storage};
use crate::HarvestError;

/// Number of languages listed in the breakdown
const TOP_LANGUAGES: usize = 10;

/// Catalog statistics summary
#[derive(Debug, Clone)]
pub struct CatalogStatistics {
    /// Distinct entries in the catalog
    pub total_entries: u64,

    /// Snapshot rows across all days
    pub total_snapshots: u64,

    /// Distinct observation days
    pub snapshot_days: u64,

    /// Most common primary languages, most frequent first
    pub top_languages: Vec<(String, u64)>,

    pub checkpoints: Vec<CheckpointRecord>,

    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CatalogStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CatalogStatistics, HarvestError> {
    Ok(CatalogStatistics {
        total_entries: storage.count_entries()?,
        total_snapshots: storage.count_snapshots()?,
        snapshot_days: storage.count_snapshot_days()?,
        top_languages: storage.get_language_breakdown(TOP_LANGUAGES)?,
        checkpoints: storage.list_checkpoints()?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Overview:");
    println!("  Catalog entries: {}", stats.total_entries);
    println!("  Popularity snapshots: {}", stats.total_snapshots);
    println!("  Observation days: {}", stats.snapshot_days);
    println!();

    if !stats.top_languages.is_empty() {
        println!("Top Languages:");
        for (language, count) in &stats.top_languages {
            let percentage = if stats.total_entries > 0 {
                (*count as f64 / stats.total_entries as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", language, count, percentage);
        }
        println!();
    }

    println!("Checkpoints ({}):", stats.checkpoints.len());
    for checkpoint in &stats.checkpoints {
        println!(
            "  - {} -> {} (updated {})",
            checkpoint.key, checkpoint.cursor, checkpoint.updated_at
        );
    }
    println!();

    match &stats.latest_run {
        Some(run) => {
            println!("Latest Run:");
            println!("  ID: {}", run.id);
            println!("  Checkpoint key: {}", run.checkpoint_key);
            println!("  Started: {}", run.started_at);
            println!(
                "  Finished: {}",
                run.finished_at.as_deref().unwrap_or("(still running)")
            );
            println!("  Status: {}", run.status.to_db_string());
            println!("  Records fetched: {}", run.records_fetched);
        }
        None => println!("No harvest runs recorded"),
    }
}
