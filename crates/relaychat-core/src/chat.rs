//! Chat completion orchestration.
//!
//! One inbound user message drives one outbound completion: load the chat,
//! resolve its model configuration, persist the inbound message, build the
//! prompt from the full chronological history, call the provider, persist
//! the assistant reply. The chat's `updated_at` is bumped exactly once per
//! inbound message whether or not a completion was triggered, so chat lists
//! sorted by `updated_at` stay meaningful.
//!
//! The outbound call goes through the [`CompletionTransport`] seam; the
//! production transport is plain reqwest, tests inject canned responses.
//!
//! The prompt always carries the complete history — no truncation or
//! windowing. That is a deliberate carry-over, flagged in DESIGN.md, not an
//! optimization target.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::ProviderSettings;
use crate::credentials::CredentialService;
use crate::error::{CoreError, CoreResult};
use crate::model_config::{ModelConfigService, ModelConfiguration};
use crate::provider::types::{ChatMessage, CompletionResponse};
use crate::provider::ProviderKey;
use crate::store::{filters, OrderBy, RecordStore};

pub const CHATS_TABLE: &str = "chats";
pub const MESSAGES_TABLE: &str = "messages";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub model_config_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One message in a chat. Created once, immutable thereafter; ordering
/// within a chat is `created_at` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    /// Populated only for assistant messages:
    /// `{provider, model, finish_reason, usage}`.
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Inbound message payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub content: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub stream: bool,
}

fn default_role() -> String {
    "user".into()
}

impl MessageCreate {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            role: default_role(),
            stream: false,
        }
    }
}

/// Result of `send_message`: the persisted inbound row plus the assistant
/// reply when a completion was triggered.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub user_message: Message,
    pub assistant_message: Option<Message>,
}

// ── Outbound transport seam ─────────────────────────────────────────

/// A prepared completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Raw provider response before any status/shape interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Strategy for issuing the outbound POST, fixed at service construction.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn execute(&self, request: CompletionRequest) -> anyhow::Result<RawResponse>;
}

/// Production transport: plain reqwest with a fixed per-request timeout.
pub struct HttpCompletionTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpCompletionTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            timeout,
        })
    }
}

#[async_trait]
impl CompletionTransport for HttpCompletionTransport {
    async fn execute(&self, request: CompletionRequest) -> anyhow::Result<RawResponse> {
        let mut outbound = self
            .client
            .post(&request.url)
            .timeout(self.timeout)
            .json(&request.body);
        for (name, value) in &request.headers {
            outbound = outbound.header(name, value);
        }

        let response = outbound.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn RecordStore>,
    credentials: CredentialService,
    model_configs: ModelConfigService,
    settings: HashMap<ProviderKey, ProviderSettings>,
    transport: Arc<dyn CompletionTransport>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        credentials: CredentialService,
        model_configs: ModelConfigService,
        settings: HashMap<ProviderKey, ProviderSettings>,
        transport: Arc<dyn CompletionTransport>,
    ) -> Self {
        Self {
            store,
            credentials,
            model_configs,
            settings,
            transport,
        }
    }

    // ── Chat CRUD ───────────────────────────────────────────────────

    pub async fn create_chat(
        &self,
        user_id: &str,
        title: &str,
        model_config_id: Option<String>,
    ) -> CoreResult<Chat> {
        if let Some(config_id) = &model_config_id {
            // Reject pins to configurations the user does not own.
            self.model_configs.get(user_id, config_id).await?;
        }
        let now = Utc::now();
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            model_config_id,
            created_at: now,
            updated_at: now,
        };
        let row = serde_json::to_value(&chat).map_err(|e| CoreError::Store(e.to_string()))?;
        self.store.insert(CHATS_TABLE, row).await?;
        Ok(chat)
    }

    /// The user's chats, most recently active first.
    pub async fn list_chats(&self, user_id: &str) -> CoreResult<Vec<Chat>> {
        let rows = self
            .store
            .select(
                CHATS_TABLE,
                &filters([("user_id", json!(user_id))]),
                None,
                Some(OrderBy::desc("updated_at")),
            )
            .await?;
        rows.into_iter().map(parse_chat).collect()
    }

    pub async fn get_chat(&self, user_id: &str, chat_id: &str) -> CoreResult<Chat> {
        let rows = self
            .store
            .select(
                CHATS_TABLE,
                &filters([("id", json!(chat_id)), ("user_id", json!(user_id))]),
                Some(1),
                None,
            )
            .await?;
        rows.into_iter()
            .next()
            .map(parse_chat)
            .ok_or(CoreError::not_found("chat"))?
    }

    /// Delete a chat and its messages.
    pub async fn delete_chat(&self, user_id: &str, chat_id: &str) -> CoreResult<()> {
        let removed = self
            .store
            .delete(
                CHATS_TABLE,
                &filters([("id", json!(chat_id)), ("user_id", json!(user_id))]),
            )
            .await?;
        if removed.is_empty() {
            return Err(CoreError::not_found("chat"));
        }
        self.store
            .delete(MESSAGES_TABLE, &filters([("chat_id", json!(chat_id))]))
            .await?;
        Ok(())
    }

    /// A chat's messages in chronological order.
    pub async fn list_messages(&self, user_id: &str, chat_id: &str) -> CoreResult<Vec<Message>> {
        self.get_chat(user_id, chat_id).await?;
        let rows = self
            .store
            .select(
                MESSAGES_TABLE,
                &filters([("chat_id", json!(chat_id))]),
                None,
                Some(OrderBy::asc("created_at")),
            )
            .await?;
        rows.into_iter().map(parse_message).collect()
    }

    // ── Completion flow ─────────────────────────────────────────────

    /// Handle one inbound message. Only `role = "user"` triggers a
    /// completion; other roles are persisted and the chat is touched.
    pub async fn send_message(
        &self,
        user_id: &str,
        chat_id: &str,
        create: MessageCreate,
    ) -> CoreResult<SendOutcome> {
        // Rejected before any store access.
        if create.stream {
            return Err(CoreError::NotImplemented(
                "streaming completions are not implemented".into(),
            ));
        }
        if !matches!(create.role.as_str(), "user" | "assistant" | "system") {
            return Err(CoreError::Validation(format!(
                "invalid message role: {}",
                create.role
            )));
        }
        if create.content.trim().is_empty() {
            return Err(CoreError::Validation("message content must not be empty".into()));
        }

        let chat = self.get_chat(user_id, chat_id).await?;
        let config = self
            .model_configs
            .resolve_for_chat(user_id, chat_id, chat.model_config_id.as_deref())
            .await?;

        let user_message = self
            .persist_message(chat_id, &create.role, &create.content, None)
            .await?;

        if create.role != "user" {
            self.touch_chat(chat_id).await?;
            return Ok(SendOutcome {
                user_message,
                assistant_message: None,
            });
        }

        let assistant_message = self.complete(user_id, chat_id, &config).await?;
        self.touch_chat(chat_id).await?;

        Ok(SendOutcome {
            user_message,
            assistant_message: Some(assistant_message),
        })
    }

    /// Issue the outbound completion and persist the assistant reply.
    async fn complete(
        &self,
        user_id: &str,
        chat_id: &str,
        config: &ModelConfiguration,
    ) -> CoreResult<Message> {
        let provider = config.provider;
        let provider_config = self
            .credentials
            .resolve_one(user_id, provider)
            .await?
            .filter(|c| c.is_active)
            .ok_or_else(|| {
                CoreError::ConfigurationMissing(format!(
                    "no active credential for provider {provider} — add an API key first"
                ))
            })?;
        let api_key = provider_config.api_key.as_deref().ok_or_else(|| {
            CoreError::ConfigurationMissing(format!(
                "the stored credential for {provider} has no usable key"
            ))
        })?;

        let history = self.list_messages(user_id, chat_id).await?;
        let mut prompt = Vec::with_capacity(history.len() + 1);
        if let Some(system_prompt) = &config.settings.system_prompt {
            prompt.push(ChatMessage::system(system_prompt));
        }
        prompt.extend(
            history
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                }),
        );

        let body = build_payload(config, &prompt)?;
        let url = completion_url(
            provider,
            provider_config.base_url.as_deref(),
            self.settings.get(&provider),
        );
        let headers = build_headers(api_key, provider_config.metadata.as_ref());

        debug!(provider = %provider, model = %config.model, url = %url, msg_count = prompt.len(),
               "Sending chat completion request");

        let response = self
            .transport
            .execute(CompletionRequest { url, headers, body })
            .await
            .map_err(|e| {
                error!(provider = %provider, error = %e, "Completion transport failed");
                CoreError::Upstream {
                    provider: provider.to_string(),
                    status: None,
                    detail: e.to_string(),
                }
            })?;

        if !(200..300).contains(&response.status) {
            error!(provider = %provider, status = response.status, body = %response.body,
                   "Provider returned an error status");
            return Err(CoreError::Upstream {
                provider: provider.to_string(),
                status: Some(response.status),
                detail: format!("provider returned status {}", response.status),
            });
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&response.body).map_err(|e| {
                error!(provider = %provider, error = %e, body = %response.body,
                       "Malformed completion response");
                CoreError::Upstream {
                    provider: provider.to_string(),
                    status: None,
                    detail: format!("malformed completion response: {e}"),
                }
            })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            CoreError::Upstream {
                provider: provider.to_string(),
                status: None,
                detail: "completion response contained no choices".into(),
            }
        })?;
        let content = choice.message.text();
        if content.trim().is_empty() {
            return Err(CoreError::Upstream {
                provider: provider.to_string(),
                status: None,
                detail: "completion response contained no content".into(),
            });
        }

        let metadata = json!({
            "provider": provider,
            "model": config.model,
            "finish_reason": choice.finish_reason,
            "usage": parsed.usage,
        });
        let assistant = self
            .persist_message(chat_id, "assistant", &content, Some(metadata))
            .await?;

        info!(chat_id, provider = %provider, model = %config.model, "Completion persisted");
        Ok(assistant)
    }

    async fn persist_message(
        &self,
        chat_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Value>,
    ) -> CoreResult<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            metadata,
            created_at: Utc::now(),
        };
        let row = serde_json::to_value(&message).map_err(|e| CoreError::Store(e.to_string()))?;
        self.store.insert(MESSAGES_TABLE, row).await?;
        Ok(message)
    }

    async fn touch_chat(&self, chat_id: &str) -> CoreResult<()> {
        self.store
            .update(
                CHATS_TABLE,
                json!({"updated_at": Utc::now()}),
                &filters([("id", json!(chat_id))]),
            )
            .await?;
        Ok(())
    }
}

// ── Request construction ────────────────────────────────────────────

/// Build the outbound JSON body. `temperature` is always present; the other
/// knobs only when set. `settings.metadata` is merged last and may override
/// anything before it, including `model` — power-user behavior, kept as-is.
pub fn build_payload(config: &ModelConfiguration, messages: &[ChatMessage]) -> CoreResult<Value> {
    let settings = &config.settings;
    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(config.model));
    body.insert(
        "messages".into(),
        serde_json::to_value(messages).map_err(|e| CoreError::Store(e.to_string()))?,
    );
    body.insert("temperature".into(), json!(settings.temperature));
    if let Some(max_tokens) = settings.max_tokens {
        body.insert("max_tokens".into(), json!(max_tokens));
    }
    if let Some(top_p) = settings.top_p {
        body.insert("top_p".into(), json!(top_p));
    }
    if let Some(penalty) = settings.frequency_penalty {
        body.insert("frequency_penalty".into(), json!(penalty));
    }
    if let Some(penalty) = settings.presence_penalty {
        body.insert("presence_penalty".into(), json!(penalty));
    }
    if let Some(Value::Object(extra)) = &settings.metadata {
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::Object(body))
}

/// Resolve the completion endpoint: explicit base-url override, then the
/// provider's settings entry, then the hard-coded default. The
/// `/chat/completions` suffix is appended unless already present.
pub fn completion_url(
    provider: ProviderKey,
    base_override: Option<&str>,
    settings: Option<&ProviderSettings>,
) -> String {
    let base = base_override
        .or_else(|| settings.and_then(|s| s.base_url.as_deref()))
        .unwrap_or_else(|| provider.default_base_url())
        .trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

/// Headers beyond `Content-Type`, which the transport's JSON encoding
/// already sets.
fn build_headers(api_key: &str, metadata: Option<&Value>) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Accept".to_string(), "application/json".to_string()),
        ("Authorization".to_string(), format!("Bearer {api_key}")),
    ];
    if let Some(metadata) = metadata {
        if let Some(referer) = metadata.get("referer").and_then(|v| v.as_str()) {
            headers.push(("HTTP-Referer".into(), referer.into()));
        }
        if let Some(app_name) = metadata.get("app_name").and_then(|v| v.as_str()) {
            headers.push(("X-Title".into(), app_name.into()));
        }
        if let Some(extra) = metadata.get("headers").and_then(|h| h.as_object()) {
            for (name, value) in extra {
                if let Some(value) = value.as_str() {
                    headers.push((name.clone(), value.into()));
                }
            }
        }
    }
    headers
}

fn parse_chat(row: Value) -> CoreResult<Chat> {
    serde_json::from_value(row).map_err(|e| CoreError::Store(format!("malformed chat row: {e}")))
}

fn parse_message(row: Value) -> CoreResult<Message> {
    serde_json::from_value(row)
        .map_err(|e| CoreError::Store(format!("malformed message row: {e}")))
}
