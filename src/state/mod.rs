//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `CrawlPhase`: the phases of the harvest state machine
//! - `ProgressTracker`: running totals, throughput and ETA for the advisory progress log

mod phase;
mod progress;

// Re-export main types
pub use phase::CrawlPhase;
pub use progress::{ProgressReport, ProgressTracker};
