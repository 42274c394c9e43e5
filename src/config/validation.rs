use crate::config::types::{
    Config, HarvestConfig, QuotaConfig, RetryConfig, StorageConfig, UpstreamConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_upstream_config(&config.upstream)?;
    validate_storage_config(&config.storage)?;
    validate_retry_config(&config.retry)?;
    validate_quota_config(&config.quota)?;
    Ok(())
}

fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.target_count < 1 {
        return Err(ConfigError::Validation(format!(
            "target_count must be >= 1, got {}",
            config.target_count
        )));
    }

    if config.page_size < 1 {
        return Err(ConfigError::Validation(
            "page_size must be >= 1".to_string(),
        ));
    }

    if config.checkpoint_key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_key cannot be empty".to_string(),
        ));
    }

    if config.search_query.trim().is_empty() {
        return Err(ConfigError::Validation(
            "search_query cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_upstream_config(config: &UpstreamConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.token_env.is_empty() {
        return Err(ConfigError::Validation(
            "token_env cannot be empty".to_string(),
        ));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.base_delay_ms < 1 {
        return Err(ConfigError::Validation(
            "base_delay_ms must be >= 1".to_string(),
        ));
    }

    if config.max_delay_ms < config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_delay_ms ({}) must be >= base_delay_ms ({})",
            config.max_delay_ms, config.base_delay_ms
        )));
    }

    if config.protocol_pause_ms < 1 {
        return Err(ConfigError::Validation(
            "protocol_pause_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Upper bound for the margin added to a quota reset wait
const MAX_SAFETY_MARGIN_SECS: u64 = 3600;

fn validate_quota_config(config: &QuotaConfig) -> Result<(), ConfigError> {
    if config.soft_threshold < config.low_water_mark {
        return Err(ConfigError::Validation(format!(
            "soft_threshold ({}) must be >= low_water_mark ({})",
            config.soft_threshold, config.low_water_mark
        )));
    }

    if config.safety_margin_secs > MAX_SAFETY_MARGIN_SECS {
        return Err(ConfigError::Validation(format!(
            "safety_margin_secs ({}) must be <= {}",
            config.safety_margin_secs, MAX_SAFETY_MARGIN_SECS
        )));
    }

    if config.fallback_pause_secs < 1 {
        return Err(ConfigError::Validation(
            "fallback_pause_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            harvest: HarvestConfig::default(),
            upstream: UpstreamConfig::default(),
            storage: StorageConfig {
                database_path: "./catalog.db".to_string(),
            },
            retry: RetryConfig::default(),
            quota: QuotaConfig::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_endpoint_must_be_http() {
        let mut config = valid_config();
        config.upstream.endpoint = "ftp://example.com/graphql".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));

        config.upstream.endpoint = "not a url".to_string();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        let mut config = valid_config();
        config.quota.low_water_mark = 2000;
        config.quota.soft_threshold = 1000;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_backoff_cap_below_base_is_rejected() {
        let mut config = valid_config();
        config.retry.base_delay_ms = 5_000;
        config.retry.max_delay_ms = 1_000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_blank_checkpoint_key_is_rejected() {
        let mut config = valid_config();
        config.harvest.checkpoint_key = "  ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_oversized_safety_margin_is_rejected() {
        let mut config = valid_config();
        config.quota.safety_margin_secs = 3600;
        assert!(validate(&config).is_ok());

        config.quota.safety_margin_secs = u64::MAX;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }
}
