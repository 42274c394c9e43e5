//! Configuration module for repo-harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and resolving the API credential from the environment.
//!
//! # Example
//!
//! ```no_run
//! use repo_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting up to {} records", config.harvest.target_count);
//! ```

mod credential;
mod parser;
mod types;
mod validation;

// Re-export types
pub use credential::{load_credential, Credential};
pub use types::{
    Config, HarvestConfig, QuotaConfig, RetryConfig, StorageConfig, UpstreamConfig,
    MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
