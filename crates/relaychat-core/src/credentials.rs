//! Provider credential storage and resolution.
//!
//! A user stores at most one configuration per provider (upsert on
//! `(user_id, provider)`). The plaintext API key is never persisted: the row
//! carries an irreversible SHA-256 fingerprint for audit/dedup, a masked
//! preview for display, and an AES-GCM ciphertext for actual use. Keys are
//! decrypted into a transient in-memory projection per request and never
//! logged.
//!
//! Activation probes the key against the live provider before anything is
//! written, so a stored-and-active configuration is known to have worked at
//! least once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::provider::ProviderKey;
use crate::store::{filters, RecordStore};
use crate::vault::{self, Vault};

pub const TABLE: &str = "provider_configurations";

/// One stored provider credential row, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    pub id: String,
    pub user_id: String,
    pub provider: ProviderKey,
    pub display_name: Option<String>,
    pub base_url: Option<String>,
    pub metadata: Option<Value>,
    pub api_key_hash: Option<String>,
    pub api_key_preview: Option<String>,
    pub api_key_encrypted: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory projection of a row with the key decrypted. Never persisted.
#[derive(Debug, Clone)]
pub struct ResolvedProviderConfig {
    pub id: String,
    pub user_id: String,
    pub provider: ProviderKey,
    pub display_name: Option<String>,
    pub base_url: Option<String>,
    pub metadata: Option<Value>,
    pub api_key: Option<String>,
    pub is_active: bool,
}

/// Optional fields accepted when activating a provider.
#[derive(Debug, Clone, Default)]
pub struct ActivateOptions {
    pub display_name: Option<String>,
    pub base_url: Option<String>,
    pub metadata: Option<Value>,
}

/// What to do with the stored key on update.
#[derive(Debug, Clone, Default)]
pub enum KeyChange {
    #[default]
    Keep,
    Clear,
    Rotate(String),
}

/// Mutable fields accepted on update.
#[derive(Debug, Clone, Default)]
pub struct UpdateProviderConfig {
    pub display_name: Option<String>,
    pub base_url: Option<String>,
    pub metadata: Option<Value>,
    pub key: KeyChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    NotConfigured,
    MissingKey,
    Inactive,
    Ready,
}

/// Per-provider readiness, one entry per well-known provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderKey,
    pub state: ProviderState,
    pub message: &'static str,
}

/// Validates an API key against the live provider before it is stored.
#[async_trait]
pub trait KeyProbe: Send + Sync {
    async fn probe(
        &self,
        provider: ProviderKey,
        base_url: &str,
        api_key: &str,
    ) -> anyhow::Result<()>;
}

/// Production probe: the cheapest authenticated GET the provider offers is
/// its model-list endpoint.
pub struct HttpKeyProbe {
    timeout: std::time::Duration,
}

impl HttpKeyProbe {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl KeyProbe for HttpKeyProbe {
    async fn probe(
        &self,
        provider: ProviderKey,
        base_url: &str,
        api_key: &str,
    ) -> anyhow::Result<()> {
        let url = format!("{}/models", base_url.trim_end_matches('/'));
        let mut request = reqwest::Client::new()
            .get(&url)
            .timeout(self.timeout)
            .header("Accept", "application/json");
        request = match provider {
            ProviderKey::Anthropic => request
                .header("x-api-key", api_key)
                .header("anthropic-version", "2023-06-01"),
            _ => request.header("Authorization", format!("Bearer {api_key}")),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("provider rejected the key ({status})");
        }
        Ok(())
    }
}

/// Credential store operations, all scoped to one user.
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn RecordStore>,
    vault: Arc<Vault>,
    probe: Arc<dyn KeyProbe>,
}

impl CredentialService {
    pub fn new(store: Arc<dyn RecordStore>, vault: Arc<Vault>, probe: Arc<dyn KeyProbe>) -> Self {
        Self { store, vault, probe }
    }

    /// All of the user's rows with keys decrypted in memory. A row whose
    /// ciphertext fails to decrypt keeps `api_key = None` — one broken key
    /// must not block access to the other providers.
    pub async fn resolve_for_user(&self, user_id: &str) -> CoreResult<Vec<ResolvedProviderConfig>> {
        let rows = self
            .store
            .select(TABLE, &filters([("user_id", json!(user_id))]), None, None)
            .await?;

        let mut resolved = Vec::with_capacity(rows.len());
        for row in rows {
            let cfg = parse_row(row)?;
            let api_key = match &cfg.api_key_encrypted {
                Some(ciphertext) => match self.vault.decrypt(ciphertext) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(
                            provider = %cfg.provider,
                            error = %e,
                            "Credential decryption failed, treating key as missing"
                        );
                        None
                    }
                },
                None => None,
            };
            resolved.push(ResolvedProviderConfig {
                id: cfg.id,
                user_id: cfg.user_id,
                provider: cfg.provider,
                display_name: cfg.display_name,
                base_url: cfg.base_url,
                metadata: cfg.metadata,
                api_key,
                is_active: cfg.is_active,
            });
        }
        Ok(resolved)
    }

    /// The user's resolved configuration for one provider, if stored.
    pub async fn resolve_one(
        &self,
        user_id: &str,
        provider: ProviderKey,
    ) -> CoreResult<Option<ResolvedProviderConfig>> {
        let all = self.resolve_for_user(user_id).await?;
        Ok(all.into_iter().find(|c| c.provider == provider))
    }

    /// Validate a key against the live provider, then store it encrypted and
    /// mark the configuration active. Upserts on `(user_id, provider)`.
    pub async fn activate(
        &self,
        user_id: &str,
        provider: ProviderKey,
        api_key: &str,
        options: ActivateOptions,
    ) -> CoreResult<ProviderConfiguration> {
        if api_key.trim().is_empty() {
            return Err(CoreError::Validation("API key must not be empty".into()));
        }

        let probe_base = options
            .base_url
            .as_deref()
            .unwrap_or_else(|| provider.default_base_url());
        self.probe
            .probe(provider, probe_base, api_key)
            .await
            .map_err(|e| {
                CoreError::Validation(format!("API key validation failed for {provider}: {e}"))
            })?;

        let now = Utc::now();
        let row = serde_json::to_value(ProviderConfiguration {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            provider,
            display_name: options.display_name,
            base_url: options.base_url,
            metadata: options.metadata,
            api_key_hash: Some(vault::fingerprint(api_key)),
            api_key_preview: Some(vault::mask(api_key)),
            api_key_encrypted: Some(self.vault.encrypt(api_key)?),
            is_active: true,
            created_at: now,
            updated_at: now,
        })
        .map_err(|e| CoreError::Store(e.to_string()))?;

        let stored = self
            .store
            .upsert(TABLE, row, &["user_id", "provider"])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Store("upsert returned no row".into()))?;

        info!(user_id, provider = %provider, "Provider credential activated");
        parse_row(stored)
    }

    /// Update display fields and optionally clear or rotate the key.
    /// Rotation re-probes and re-encrypts; clearing nulls all three
    /// credential fields while keeping the row.
    pub async fn update(
        &self,
        user_id: &str,
        provider: ProviderKey,
        changes: UpdateProviderConfig,
    ) -> CoreResult<ProviderConfiguration> {
        let existing = self
            .fetch(user_id, provider)
            .await?
            .ok_or_else(|| CoreError::not_found("provider configuration"))?;

        let mut patch = serde_json::Map::new();
        if let Some(name) = changes.display_name {
            patch.insert("display_name".into(), json!(name));
        }
        if let Some(base_url) = &changes.base_url {
            patch.insert("base_url".into(), json!(base_url));
        }
        if let Some(metadata) = changes.metadata {
            patch.insert("metadata".into(), metadata);
        }

        match changes.key {
            KeyChange::Keep => {}
            KeyChange::Clear => {
                patch.insert("api_key_hash".into(), Value::Null);
                patch.insert("api_key_preview".into(), Value::Null);
                patch.insert("api_key_encrypted".into(), Value::Null);
            }
            KeyChange::Rotate(new_key) => {
                let probe_base = changes
                    .base_url
                    .as_deref()
                    .or(existing.base_url.as_deref())
                    .unwrap_or_else(|| provider.default_base_url());
                self.probe
                    .probe(provider, probe_base, &new_key)
                    .await
                    .map_err(|e| {
                        CoreError::Validation(format!(
                            "API key validation failed for {provider}: {e}"
                        ))
                    })?;
                patch.insert("api_key_hash".into(), json!(vault::fingerprint(&new_key)));
                patch.insert("api_key_preview".into(), json!(vault::mask(&new_key)));
                patch.insert("api_key_encrypted".into(), json!(self.vault.encrypt(&new_key)?));
                patch.insert("is_active".into(), json!(true));
            }
        }
        patch.insert("updated_at".into(), json!(Utc::now()));

        let updated = self
            .store
            .update(
                TABLE,
                Value::Object(patch),
                &filters([
                    ("user_id", json!(user_id)),
                    ("provider", json!(provider)),
                ]),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found("provider configuration"))?;
        parse_row(updated)
    }

    /// Flip `is_active` off without deleting history.
    pub async fn deactivate(&self, user_id: &str, provider: ProviderKey) -> CoreResult<()> {
        let updated = self
            .store
            .update(
                TABLE,
                json!({"is_active": false, "updated_at": Utc::now()}),
                &filters([
                    ("user_id", json!(user_id)),
                    ("provider", json!(provider)),
                ]),
            )
            .await?;
        if updated.is_empty() {
            return Err(CoreError::not_found("provider configuration"));
        }
        info!(user_id, provider = %provider, "Provider credential deactivated");
        Ok(())
    }

    /// Readiness of every well-known provider for this user.
    pub async fn status(&self, user_id: &str) -> CoreResult<Vec<ProviderStatus>> {
        let rows = self
            .store
            .select(TABLE, &filters([("user_id", json!(user_id))]), None, None)
            .await?;
        let configured: Vec<ProviderConfiguration> =
            rows.into_iter().map(parse_row).collect::<CoreResult<_>>()?;

        Ok(ProviderKey::well_known()
            .into_iter()
            .map(|provider| {
                let (state, message) =
                    match configured.iter().find(|c| c.provider == provider) {
                        None => (ProviderState::NotConfigured, "not configured"),
                        Some(c) if c.api_key_encrypted.is_none() => {
                            (ProviderState::MissingKey, "configured but missing key")
                        }
                        Some(c) if !c.is_active => {
                            (ProviderState::Inactive, "configured but inactive")
                        }
                        Some(_) => (ProviderState::Ready, "active and ready"),
                    };
                ProviderStatus {
                    provider,
                    state,
                    message,
                }
            })
            .collect())
    }

    async fn fetch(
        &self,
        user_id: &str,
        provider: ProviderKey,
    ) -> CoreResult<Option<ProviderConfiguration>> {
        let rows = self
            .store
            .select(
                TABLE,
                &filters([
                    ("user_id", json!(user_id)),
                    ("provider", json!(provider)),
                ]),
                Some(1),
                None,
            )
            .await?;
        rows.into_iter().next().map(parse_row).transpose()
    }
}

fn parse_row(row: Value) -> CoreResult<ProviderConfiguration> {
    serde_json::from_value(row).map_err(|e| CoreError::Store(format!("malformed row: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    struct AlwaysOk;
    #[async_trait]
    impl KeyProbe for AlwaysOk {
        async fn probe(&self, _: ProviderKey, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct AlwaysReject;
    #[async_trait]
    impl KeyProbe for AlwaysReject {
        async fn probe(&self, _: ProviderKey, _: &str, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("provider rejected the key (401 Unauthorized)")
        }
    }

    fn service(probe: Arc<dyn KeyProbe>) -> (CredentialService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(Vault::generate().0);
        (
            CredentialService::new(store.clone(), vault, probe),
            store,
        )
    }

    #[tokio::test]
    async fn test_activate_stores_no_plaintext() {
        let (svc, store) = service(Arc::new(AlwaysOk));
        let plaintext = "sk-live-abcdef123456";
        svc.activate("u1", ProviderKey::OpenAi, plaintext, ActivateOptions::default())
            .await
            .unwrap();

        let rows = store
            .select(TABLE, &filters([("user_id", json!("u1"))]), None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(row["api_key_hash"].is_string());
        assert!(row["api_key_preview"].is_string());
        assert!(row["api_key_encrypted"].is_string());
        // No persisted field may contain the plaintext key.
        let serialized = row.to_string();
        assert!(!serialized.contains(plaintext));
    }

    #[tokio::test]
    async fn test_activate_twice_keeps_one_row_per_provider() {
        let (svc, store) = service(Arc::new(AlwaysOk));
        svc.activate("u1", ProviderKey::Groq, "gsk-first-key-111", Default::default())
            .await
            .unwrap();
        svc.activate("u1", ProviderKey::Groq, "gsk-second-key-222", Default::default())
            .await
            .unwrap();

        let rows = store
            .select(TABLE, &filters([("user_id", json!("u1"))]), None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let resolved = svc.resolve_for_user("u1").await.unwrap();
        assert_eq!(resolved[0].api_key.as_deref(), Some("gsk-second-key-222"));
    }

    #[tokio::test]
    async fn test_activate_rejected_key_writes_nothing() {
        let (svc, store) = service(Arc::new(AlwaysReject));
        let err = svc
            .activate("u1", ProviderKey::OpenAi, "sk-bad-key", Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(err.to_string().contains("openai"));

        let rows = store
            .select(TABLE, &crate::store::Filters::new(), None, None)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_broken_ciphertext_does_not_block_other_providers() {
        let (svc, store) = service(Arc::new(AlwaysOk));
        svc.activate("u1", ProviderKey::Groq, "gsk-good-key-123", Default::default())
            .await
            .unwrap();
        // A row encrypted under some other vault key.
        let foreign = Vault::generate().0.encrypt("sk-foreign").unwrap();
        let now = Utc::now();
        store
            .insert(
                TABLE,
                serde_json::to_value(ProviderConfiguration {
                    id: "broken".into(),
                    user_id: "u1".into(),
                    provider: ProviderKey::OpenAi,
                    display_name: None,
                    base_url: None,
                    metadata: None,
                    api_key_hash: Some("hash".into()),
                    api_key_preview: Some("sk-f…eign".into()),
                    api_key_encrypted: Some(foreign),
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                })
                .unwrap(),
            )
            .await
            .unwrap();

        let resolved = svc.resolve_for_user("u1").await.unwrap();
        assert_eq!(resolved.len(), 2);
        let broken = resolved
            .iter()
            .find(|c| c.provider == ProviderKey::OpenAi)
            .unwrap();
        assert!(broken.api_key.is_none());
        let good = resolved
            .iter()
            .find(|c| c.provider == ProviderKey::Groq)
            .unwrap();
        assert_eq!(good.api_key.as_deref(), Some("gsk-good-key-123"));
    }

    #[tokio::test]
    async fn test_update_clear_key() {
        let (svc, _) = service(Arc::new(AlwaysOk));
        svc.activate("u1", ProviderKey::Mistral, "mis-key-123456", Default::default())
            .await
            .unwrap();
        let updated = svc
            .update(
                "u1",
                ProviderKey::Mistral,
                UpdateProviderConfig {
                    key: KeyChange::Clear,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.api_key_hash.is_none());
        assert!(updated.api_key_preview.is_none());
        assert!(updated.api_key_encrypted.is_none());
    }

    #[tokio::test]
    async fn test_update_rotate_reencrypts() {
        let (svc, _) = service(Arc::new(AlwaysOk));
        let first = svc
            .activate("u1", ProviderKey::OpenRouter, "sk-or-old-key-111", Default::default())
            .await
            .unwrap();
        let rotated = svc
            .update(
                "u1",
                ProviderKey::OpenRouter,
                UpdateProviderConfig {
                    key: KeyChange::Rotate("sk-or-new-key-222".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_ne!(rotated.api_key_hash, first.api_key_hash);

        let resolved = svc.resolve_for_user("u1").await.unwrap();
        assert_eq!(resolved[0].api_key.as_deref(), Some("sk-or-new-key-222"));
    }

    #[tokio::test]
    async fn test_deactivate_keeps_history() {
        let (svc, _) = service(Arc::new(AlwaysOk));
        svc.activate("u1", ProviderKey::DeepSeek, "sk-ds-key-12345", Default::default())
            .await
            .unwrap();
        svc.deactivate("u1", ProviderKey::DeepSeek).await.unwrap();

        let resolved = svc.resolve_for_user("u1").await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(!resolved[0].is_active);
        // Ciphertext survives deactivation.
        assert!(resolved[0].api_key.is_some());
    }

    #[tokio::test]
    async fn test_deactivate_missing_is_not_found() {
        let (svc, _) = service(Arc::new(AlwaysOk));
        assert!(matches!(
            svc.deactivate("u1", ProviderKey::OpenAi).await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_tri_state() {
        let (svc, _) = service(Arc::new(AlwaysOk));
        svc.activate("u1", ProviderKey::OpenAi, "sk-live-key-1234", Default::default())
            .await
            .unwrap();
        svc.activate("u1", ProviderKey::Groq, "gsk-live-key-1234", Default::default())
            .await
            .unwrap();
        svc.deactivate("u1", ProviderKey::Groq).await.unwrap();
        svc.activate("u1", ProviderKey::Mistral, "mis-live-key-1234", Default::default())
            .await
            .unwrap();
        svc.update(
            "u1",
            ProviderKey::Mistral,
            UpdateProviderConfig {
                key: KeyChange::Clear,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let statuses = svc.status("u1").await.unwrap();
        assert_eq!(statuses.len(), ProviderKey::well_known().len());
        let state_of = |p: ProviderKey| {
            statuses.iter().find(|s| s.provider == p).unwrap().state
        };
        assert_eq!(state_of(ProviderKey::OpenAi), ProviderState::Ready);
        assert_eq!(state_of(ProviderKey::Groq), ProviderState::Inactive);
        assert_eq!(state_of(ProviderKey::Mistral), ProviderState::MissingKey);
        assert_eq!(state_of(ProviderKey::Anthropic), ProviderState::NotConfigured);
    }
}
