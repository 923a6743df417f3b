//! Per-user model configurations and the chat resolution chain.
//!
//! A configuration binds provider + model id + generation settings. One per
//! user may be the default. Resolution for a chat walks pinned → default →
//! most-recently-updated and pins the result onto the chat row so retries
//! are idempotent and a chat's model stays stable over its lifetime.
//!
//! `set_default` is deliberately two independent writes (clear-all, then
//! set-one). Under partial failure the worst case is *no* default, which the
//! resolution chain handles; a single conditional statement could leave two.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::provider::ProviderKey;
use crate::store::{filters, OrderBy, RecordStore};

pub const TABLE: &str = "model_configurations";

/// Generation settings attached to a configuration. `metadata` is merged
/// verbatim into the outbound provider request, last, with override power.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub temperature: f64,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub system_prompt: Option<String>,
    pub metadata: Option<Value>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            system_prompt: None,
            metadata: None,
        }
    }
}

impl ModelSettings {
    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(CoreError::Validation(
                "temperature must be between 0 and 2".into(),
            ));
        }
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens < 16 {
                return Err(CoreError::Validation("max_tokens must be at least 16".into()));
            }
        }
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(CoreError::Validation("top_p must be between 0 and 1".into()));
            }
        }
        if let Some(penalty) = self.frequency_penalty {
            if !(0.0..=2.0).contains(&penalty) {
                return Err(CoreError::Validation(
                    "frequency_penalty must be between 0 and 2".into(),
                ));
            }
        }
        if let Some(penalty) = self.presence_penalty {
            if !(0.0..=2.0).contains(&penalty) {
                return Err(CoreError::Validation(
                    "presence_penalty must be between 0 and 2".into(),
                ));
            }
        }
        Ok(())
    }
}

/// One stored model preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfiguration {
    pub id: String,
    pub user_id: String,
    pub provider_config_id: Option<String>,
    pub provider: ProviderKey,
    pub model: String,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub settings: ModelSettings,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted on create.
#[derive(Debug, Clone)]
pub struct NewModelConfiguration {
    pub provider: ProviderKey,
    pub model: String,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub provider_config_id: Option<String>,
    pub settings: ModelSettings,
    pub is_default: bool,
}

/// Fields accepted on update; absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateModelConfiguration {
    pub model: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub settings: Option<ModelSettings>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct ModelConfigService {
    store: Arc<dyn RecordStore>,
}

impl ModelConfigService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        user_id: &str,
        new: NewModelConfiguration,
    ) -> CoreResult<ModelConfiguration> {
        new.settings.validate()?;
        if new.model.trim().is_empty() {
            return Err(CoreError::Validation("model id must not be empty".into()));
        }

        let now = Utc::now();
        let config = ModelConfiguration {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            provider_config_id: new.provider_config_id,
            provider: new.provider,
            model: new.model,
            name: new.name,
            display_name: new.display_name,
            description: new.description,
            settings: new.settings,
            is_default: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let row = serde_json::to_value(&config).map_err(|e| CoreError::Store(e.to_string()))?;
        self.store.insert(TABLE, row).await?;

        if new.is_default {
            // Same two-phase path as an explicit default change.
            return self.set_default(user_id, &config.id).await;
        }
        Ok(config)
    }

    /// The user's configurations; active only unless `include_inactive`.
    pub async fn list(
        &self,
        user_id: &str,
        include_inactive: bool,
    ) -> CoreResult<Vec<ModelConfiguration>> {
        let mut f = filters([("user_id", json!(user_id))]);
        if !include_inactive {
            f.insert("is_active".into(), json!(true));
        }
        let rows = self
            .store
            .select(TABLE, &f, None, Some(OrderBy::desc("updated_at")))
            .await?;
        rows.into_iter().map(parse_row).collect()
    }

    pub async fn get(&self, user_id: &str, config_id: &str) -> CoreResult<ModelConfiguration> {
        let rows = self
            .store
            .select(
                TABLE,
                &filters([("id", json!(config_id)), ("user_id", json!(user_id))]),
                Some(1),
                None,
            )
            .await?;
        rows.into_iter()
            .next()
            .map(parse_row)
            .ok_or(CoreError::not_found("model configuration"))?
    }

    pub async fn update(
        &self,
        user_id: &str,
        config_id: &str,
        changes: UpdateModelConfiguration,
    ) -> CoreResult<ModelConfiguration> {
        let mut patch = serde_json::Map::new();
        if let Some(model) = changes.model {
            patch.insert("model".into(), json!(model));
        }
        if let Some(name) = changes.name {
            patch.insert("name".into(), json!(name));
        }
        if let Some(display_name) = changes.display_name {
            patch.insert("display_name".into(), json!(display_name));
        }
        if let Some(description) = changes.description {
            patch.insert("description".into(), json!(description));
        }
        if let Some(settings) = changes.settings {
            settings.validate()?;
            patch.insert(
                "settings".into(),
                serde_json::to_value(settings).map_err(|e| CoreError::Store(e.to_string()))?,
            );
        }
        if let Some(is_active) = changes.is_active {
            patch.insert("is_active".into(), json!(is_active));
        }
        patch.insert("updated_at".into(), json!(Utc::now()));

        let updated = self
            .store
            .update(
                TABLE,
                Value::Object(patch),
                &filters([("id", json!(config_id)), ("user_id", json!(user_id))]),
            )
            .await?;
        updated
            .into_iter()
            .next()
            .map(parse_row)
            .ok_or(CoreError::not_found("model configuration"))?
    }

    pub async fn delete(&self, user_id: &str, config_id: &str) -> CoreResult<()> {
        let removed = self
            .store
            .delete(
                TABLE,
                &filters([("id", json!(config_id)), ("user_id", json!(user_id))]),
            )
            .await?;
        if removed.is_empty() {
            return Err(CoreError::not_found("model configuration"));
        }
        Ok(())
    }

    /// Make `config_id` the user's single default. Two independent writes:
    /// clear every default, then set the target. If the second write fails
    /// the user is left with no default, never two.
    pub async fn set_default(
        &self,
        user_id: &str,
        config_id: &str,
    ) -> CoreResult<ModelConfiguration> {
        // Ownership check first; cross-user ids must 404 before any write.
        self.get(user_id, config_id).await?;

        self.store
            .update(
                TABLE,
                json!({"is_default": false}),
                &filters([("user_id", json!(user_id))]),
            )
            .await?;

        let updated = self
            .store
            .update(
                TABLE,
                json!({"is_default": true, "updated_at": Utc::now()}),
                &filters([("id", json!(config_id)), ("user_id", json!(user_id))]),
            )
            .await?;
        updated
            .into_iter()
            .next()
            .map(parse_row)
            .ok_or(CoreError::not_found("model configuration"))?
    }

    /// Resolve which configuration a chat uses: the pinned one if the chat
    /// has it, else the user's default, else the most-recently-updated one.
    /// A non-pinned pick is written back onto the chat row, so the next
    /// resolution takes the pinned path and writes nothing.
    pub async fn resolve_for_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        pinned: Option<&str>,
    ) -> CoreResult<ModelConfiguration> {
        if let Some(config_id) = pinned {
            return self.get(user_id, config_id).await;
        }

        let default_rows = self
            .store
            .select(
                TABLE,
                &filters([
                    ("user_id", json!(user_id)),
                    ("is_default", json!(true)),
                    ("is_active", json!(true)),
                ]),
                Some(1),
                None,
            )
            .await?;

        let picked = match default_rows.into_iter().next() {
            Some(row) => parse_row(row)?,
            None => {
                let recent = self
                    .store
                    .select(
                        TABLE,
                        &filters([("user_id", json!(user_id)), ("is_active", json!(true))]),
                        Some(1),
                        Some(OrderBy::desc("updated_at")),
                    )
                    .await?;
                match recent.into_iter().next() {
                    Some(row) => parse_row(row)?,
                    None => {
                        return Err(CoreError::ConfigurationMissing(
                            "configure at least one model before sending messages".into(),
                        ))
                    }
                }
            }
        };

        self.store
            .update(
                crate::chat::CHATS_TABLE,
                json!({"model_config_id": picked.id}),
                &filters([("id", json!(chat_id)), ("user_id", json!(user_id))]),
            )
            .await?;
        info!(chat_id, model_config_id = %picked.id, "Pinned model configuration to chat");

        Ok(picked)
    }
}

fn parse_row(row: Value) -> CoreResult<ModelConfiguration> {
    serde_json::from_value(row).map_err(|e| CoreError::Store(format!("malformed row: {e}")))
}
