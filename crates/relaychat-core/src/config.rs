//! Service configuration for relaychat.
//!
//! Loads typed configuration from a JSON file. The vault key can also come
//! from the `RELAYCHAT_VAULT_KEY` environment variable, which takes priority
//! over the file so deployments never have to write the key to disk.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::provider::ProviderKey;
use crate::vault::Vault;

/// Environment variable overriding the configured vault key.
pub const VAULT_KEY_ENV: &str = "RELAYCHAT_VAULT_KEY";

/// Per-provider connection settings used as the mid-priority fallback when a
/// user's stored configuration does not override them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Base64-encoded 256-bit vault key. Prefer `RELAYCHAT_VAULT_KEY`.
    pub vault_key: Option<String>,
    /// Outbound request timeout in seconds.
    pub request_timeout_secs: u64,
    pub providers: HashMap<ProviderKey, ProviderSettings>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            vault_key: None,
            request_timeout_secs: 30,
            providers: HashMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist. Env overrides are applied either way.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            tracing::debug!("Loading config from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .map_err(|e| CoreError::Validation(format!("read config: {e}")))?;
            serde_json::from_str(&content)
                .map_err(|e| CoreError::Validation(format!("parse config: {e}")))?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var(VAULT_KEY_ENV) {
            tracing::info!("Using vault key from environment variable");
            config.vault_key = Some(key);
        }

        Ok(config)
    }

    /// Build the credential cipher from the configured key.
    pub fn vault(&self) -> CoreResult<Vault> {
        let key = self.vault_key.as_deref().ok_or_else(|| {
            CoreError::ConfigurationMissing(format!(
                "no vault key configured — set {VAULT_KEY_ENV} or vaultKey in the config file"
            ))
        })?;
        Vault::from_base64(key)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings for one provider, if any were configured.
    pub fn provider_settings(&self, key: ProviderKey) -> Option<&ProviderSettings> {
        self.providers.get(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.providers.is_empty());
        assert!(config.vault_key.is_none());
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let json = r#"{"providers": {"groq": {"apiKey": "gsk-test"}}}"#;
        let config: ServiceConfig = serde_json::from_str(json).unwrap();
        let settings = config.provider_settings(ProviderKey::Groq).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("gsk-test"));
        assert!(settings.base_url.is_none());
    }

    #[test]
    fn test_vault_requires_key() {
        let config = ServiceConfig::default();
        assert!(matches!(
            config.vault(),
            Err(CoreError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn test_vault_from_configured_key() {
        let (_, encoded) = crate::vault::Vault::generate();
        let config = ServiceConfig {
            vault_key: Some(encoded),
            ..Default::default()
        };
        assert!(config.vault().is_ok());
    }
}
