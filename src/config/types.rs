use serde::Deserialize;
use std::time::Duration;

/// Largest page the upstream search API will serve
pub const MAX_PAGE_SIZE: u32 = 100;

/// Smallest page size the harvester will request
pub const MIN_PAGE_SIZE: u32 = 10;

/// Main configuration structure for a harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

/// What to harvest and where to resume from
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HarvestConfig {
    /// Number of records after which the harvest stops
    #[serde(default = "default_target_count")]
    pub target_count: u64,

    /// Requested page size, clamped to the upstream bounds
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Key under which the pagination cursor is checkpointed
    #[serde(default = "default_checkpoint_key")]
    pub checkpoint_key: String,

    /// Search predicate sent upstream
    #[serde(default = "default_search_query")]
    pub search_query: String,
}

impl HarvestConfig {
    /// Page size actually sent upstream
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            page_size: default_page_size(),
            checkpoint_key: default_checkpoint_key(),
            search_query: default_search_query(),
        }
    }
}

/// Upstream API connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpstreamConfig {
    /// GraphQL endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Durable store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

/// Backoff tuning for transient upstream failures
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound (exclusive) of the random jitter added to every delay
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,

    /// Fixed pause after a malformed or error-carrying response
    #[serde(default = "default_protocol_pause_ms")]
    pub protocol_pause_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn protocol_pause(&self) -> Duration {
        Duration::from_millis(self.protocol_pause_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            protocol_pause_ms: default_protocol_pause_ms(),
        }
    }
}

/// Quota thresholds consulted after every page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct QuotaConfig {
    /// Below this remaining budget the harvester sleeps until the quota resets
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: u32,

    /// Below this remaining budget a short pause is inserted between pages
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold: u32,

    /// Added to the computed wait until reset
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,

    /// Used when the reset timestamp cannot be parsed
    #[serde(default = "default_fallback_pause_secs")]
    pub fallback_pause_secs: u64,

    #[serde(default = "default_soft_pause_ms")]
    pub soft_pause_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            low_water_mark: default_low_water_mark(),
            soft_threshold: default_soft_threshold(),
            safety_margin_secs: default_safety_margin_secs(),
            fallback_pause_secs: default_fallback_pause_secs(),
            soft_pause_ms: default_soft_pause_ms(),
        }
    }
}

fn default_target_count() -> u64 {
    100_000
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_checkpoint_key() -> String {
    "global_search_cursor".to_string()
}

fn default_search_query() -> String {
    "stars:>0".to_string()
}

fn default_endpoint() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_user_agent() -> String {
    "repo-harvest".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_jitter_ms() -> u64 {
    300
}

fn default_protocol_pause_ms() -> u64 {
    2_000
}

fn default_low_water_mark() -> u32 {
    500
}

fn default_soft_threshold() -> u32 {
    1_000
}

fn default_safety_margin_secs() -> u64 {
    5
}

fn default_fallback_pause_secs() -> u64 {
    30
}

fn default_soft_pause_ms() -> u64 {
    500
}
