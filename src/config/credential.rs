use crate::config::types::UpstreamConfig;
use crate::ConfigError;
use std::fmt;

/// API token used to authenticate upstream requests
///
/// The token never appears in `Debug` output so it cannot leak into logs.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw token, rejecting blank values
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Reads the credential from the environment variable named in the config
///
/// Fails with [`ConfigError::MissingCredential`] if the variable is unset or blank.
pub fn load_credential(config: &UpstreamConfig) -> Result<Credential, ConfigError> {
    std::env::var(&config.token_env)
        .ok()
        .and_then(Credential::new)
        .ok_or_else(|| ConfigError::MissingCredential(config.token_env.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_token_rejected() {
        assert!(Credential::new("").is_none());
        assert!(Credential::new("   ").is_none());
        assert!(Credential::new("abc").is_some());
    }

    #[test]
    fn test_debug_hides_token() {
        let credential = Credential::new("secret-token").unwrap();
        assert!(!format!("{:?}", credential).contains("secret"));
        assert_eq!(credential.bearer(), "bearer secret-token");
    }

    #[test]
    fn test_missing_env_var_fails_fast() {
        let config = UpstreamConfig {
            token_env: "REPO_HARVEST_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
            ..UpstreamConfig::default()
        };

        let result = load_credential(&config);
        assert!(matches!(result, Err(ConfigError::MissingCredential(name))
            if name == "REPO_HARVEST_TEST_TOKEN_THAT_IS_NEVER_SET"));
    }
}
