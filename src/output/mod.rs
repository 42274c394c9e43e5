//! Output module for reporting on the harvested catalog

pub mod stats;

pub use stats::{load_statistics, print_statistics, CatalogStatistics};
