//! Per-provider model catalogue clients.
//!
//! One [`ProviderClient`] is built per configured provider record. The
//! transport strategy is chosen once at construction: OpenAI-compatible
//! catalogues go over raw HTTP, while SDK-shaped providers (Anthropic,
//! Mistral) sit behind the [`ModelCatalog`] trait so the aggregator never
//! sees the difference.
//!
//! `list_models` never fails: a missing credential degrades to an empty list
//! with a warning, and transport/status/parse failures degrade to an empty
//! list with an error log. One misbehaving provider must never poison the
//! aggregate catalogue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::types::ProviderModel;
use super::ProviderKey;
use crate::config::ProviderSettings;

/// Default outbound timeout when neither metadata nor config override it.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A source of catalogue entries. SDK-shaped providers implement this
/// directly; tests inject stubs.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> anyhow::Result<Vec<ProviderModel>>;
}

/// Transport strategy, fixed at construction.
enum Transport {
    Http(reqwest::Client),
    Sdk(Arc<dyn ModelCatalog>),
}

/// Catalogue client for one provider.
pub struct ProviderClient {
    provider: ProviderKey,
    base_url: String,
    api_key: Option<String>,
    referer: Option<String>,
    app_name: Option<String>,
    extra_headers: Vec<(String, String)>,
    timeout: Duration,
    transport: Transport,
}

impl ProviderClient {
    /// Build a client.
    ///
    /// Resolution order for the endpoint: explicit `base_url` override, then
    /// the provider's entry in service settings, then the hard-coded default.
    /// Same order for the API key (override, then settings). `metadata` may
    /// carry `timeout_secs`, a `headers` map, and `referer`/`app_name`
    /// attribution fields.
    pub fn new(
        provider: ProviderKey,
        base_url: Option<String>,
        api_key: Option<String>,
        metadata: Option<&Value>,
        settings: Option<&ProviderSettings>,
    ) -> Self {
        let base_url = base_url
            .or_else(|| settings.and_then(|s| s.base_url.clone()))
            .unwrap_or_else(|| provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        let api_key = api_key.or_else(|| settings.and_then(|s| s.api_key.clone()));

        let timeout = metadata
            .and_then(|m| m.get("timeout_secs"))
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let extra_headers = metadata
            .and_then(|m| m.get("headers"))
            .and_then(|h| h.as_object())
            .map(|h| {
                h.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let meta_str = |field: &str| {
            metadata
                .and_then(|m| m.get(field))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        debug!(provider = %provider, base_url = %base_url, "Initialized provider client");

        let transport = match provider {
            ProviderKey::Anthropic => Transport::Sdk(Arc::new(AnthropicCatalog {
                base_url: base_url.clone(),
                api_key: api_key.clone(),
                timeout,
            })),
            ProviderKey::Mistral => Transport::Sdk(Arc::new(MistralCatalog {
                base_url: base_url.clone(),
                api_key: api_key.clone(),
                timeout,
            })),
            _ => Transport::Http(reqwest::Client::new()),
        };

        Self {
            provider,
            base_url,
            api_key,
            referer: meta_str("referer"),
            app_name: meta_str("app_name"),
            extra_headers,
            timeout,
            transport,
        }
    }

    /// Replace the transport with an injected catalogue (tests, real SDKs).
    pub fn with_catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.transport = Transport::Sdk(catalog);
        self
    }

    pub fn provider(&self) -> ProviderKey {
        self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch this provider's model catalogue. Never fails; all failure modes
    /// degrade to an empty list.
    pub async fn list_models(&self) -> Vec<ProviderModel> {
        if self.api_key.is_none() {
            warn!(provider = %self.provider, "Provider not configured (no API key), skipping catalogue");
            return Vec::new();
        }

        let result = match &self.transport {
            Transport::Sdk(catalog) => catalog.list_models().await,
            Transport::Http(client) => self.fetch_http(client).await,
        };

        match result {
            Ok(models) => {
                debug!(provider = %self.provider, count = models.len(), "Fetched model catalogue");
                models
            }
            Err(e) => {
                error!(provider = %self.provider, error = %e, "Model catalogue fetch failed");
                Vec::new()
            }
        }
    }

    async fn fetch_http(&self, client: &reqwest::Client) -> anyhow::Result<Vec<ProviderModel>> {
        let url = format!("{}/models", self.base_url);

        let mut request = client
            .get(&url)
            .timeout(self.timeout)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(referer) = &self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(app_name) = &self.app_name {
            request = request.header("X-Title", app_name);
        }
        for (k, v) in &self.extra_headers {
            request = request.header(k, v);
        }

        let response = request
            .send()
            .await
            .context("failed to reach provider catalogue")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read catalogue response body")?;
        if !status.is_success() {
            anyhow::bail!("catalogue request failed ({status}): {body}");
        }

        let body: Value =
            serde_json::from_str(&body).context("failed to parse catalogue response")?;
        parse_models(self.provider, &body)
    }
}

// ── Response normalization ──────────────────────────────────────────

/// Normalize a raw catalogue body into `ProviderModel`s. Fields a provider's
/// schema does not carry stay `None`.
pub fn parse_models(provider: ProviderKey, body: &Value) -> anyhow::Result<Vec<ProviderModel>> {
    if let Some(entries) = body.get("data").and_then(|d| d.as_array()) {
        return Ok(entries
            .iter()
            .filter_map(|e| parse_entry(provider, None, e))
            .collect());
    }

    // ImageRouter returns an object keyed by model id instead of the usual
    // `{"data": [...]}` envelope.
    if provider == ProviderKey::ImageRouter {
        if let Some(map) = body.as_object() {
            return Ok(map
                .iter()
                .filter_map(|(id, e)| parse_entry(provider, Some(id), e))
                .collect());
        }
    }

    anyhow::bail!("unexpected catalogue payload shape: {body}");
}

fn parse_entry(provider: ProviderKey, keyed_id: Option<&str>, entry: &Value) -> Option<ProviderModel> {
    let str_field = |field: &str| entry.get(field).and_then(|v| v.as_str()).map(String::from);
    let u64_field = |field: &str| entry.get(field).and_then(|v| v.as_u64());

    let id = keyed_id
        .map(String::from)
        .or_else(|| str_field("id"))?;
    let name = str_field("name")
        .or_else(|| str_field("display_name"))
        .unwrap_or_else(|| id.clone());

    let context_window = match provider {
        ProviderKey::OpenRouter => u64_field("context_length"),
        ProviderKey::Groq => u64_field("context_window"),
        ProviderKey::Mistral => u64_field("max_context_length"),
        _ => None,
    };
    let max_output_tokens = match provider {
        ProviderKey::OpenRouter => entry
            .get("top_provider")
            .and_then(|t| t.get("max_completion_tokens"))
            .and_then(|v| v.as_u64()),
        ProviderKey::Groq => u64_field("max_completion_tokens"),
        _ => None,
    };
    let is_active = match provider {
        ProviderKey::Groq => entry.get("active").and_then(|v| v.as_bool()),
        _ => None,
    };
    // ImageRouter's schema is nonstandard; keep the raw entry around.
    let metadata = match provider {
        ProviderKey::ImageRouter => Some(entry.clone()),
        _ => None,
    };

    Some(ProviderModel {
        provider,
        id,
        name,
        description: str_field("description"),
        context_window,
        max_output_tokens,
        pricing: entry.get("pricing").cloned(),
        is_active,
        metadata,
    })
}

// ── SDK-shaped catalogues ───────────────────────────────────────────

/// Anthropic's models API, shaped like the official SDK client: versioned
/// header auth instead of a bearer token.
pub struct AnthropicCatalog {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[async_trait]
impl ModelCatalog for AnthropicCatalog {
    async fn list_models(&self) -> anyhow::Result<Vec<ProviderModel>> {
        let key = self
            .api_key
            .as_deref()
            .context("anthropic client has no API key")?;
        let url = format!("{}/models", self.base_url);

        let response = reqwest::Client::new()
            .get(&url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .context("failed to reach anthropic catalogue")?;

        let status = response.status();
        let body = response.text().await.context("failed to read body")?;
        if !status.is_success() {
            anyhow::bail!("anthropic catalogue request failed ({status}): {body}");
        }

        let body: Value = serde_json::from_str(&body).context("failed to parse body")?;
        parse_models(ProviderKey::Anthropic, &body)
    }
}

/// Mistral's models API behind the same SDK-shaped seam.
pub struct MistralCatalog {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[async_trait]
impl ModelCatalog for MistralCatalog {
    async fn list_models(&self) -> anyhow::Result<Vec<ProviderModel>> {
        let key = self
            .api_key
            .as_deref()
            .context("mistral client has no API key")?;
        let url = format!("{}/models", self.base_url);

        let response = reqwest::Client::new()
            .get(&url)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {key}"))
            .send()
            .await
            .context("failed to reach mistral catalogue")?;

        let status = response.status();
        let body = response.text().await.context("failed to read body")?;
        if !status.is_success() {
            anyhow::bail!("mistral catalogue request failed ({status}): {body}");
        }

        let body: Value = serde_json::from_str(&body).context("failed to parse body")?;
        parse_models(ProviderKey::Mistral, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_resolution_order() {
        // Hard-coded default.
        let c = ProviderClient::new(ProviderKey::Groq, None, Some("k".into()), None, None);
        assert_eq!(c.base_url(), "https://api.groq.com/openai/v1");

        // Settings override the default.
        let settings = ProviderSettings {
            base_url: Some("https://proxy.internal/groq/".into()),
            api_key: None,
        };
        let c = ProviderClient::new(
            ProviderKey::Groq,
            None,
            Some("k".into()),
            None,
            Some(&settings),
        );
        assert_eq!(c.base_url(), "https://proxy.internal/groq");

        // Explicit override beats both.
        let c = ProviderClient::new(
            ProviderKey::Groq,
            Some("http://localhost:8000/v1".into()),
            Some("k".into()),
            None,
            Some(&settings),
        );
        assert_eq!(c.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn test_api_key_falls_back_to_settings() {
        let settings = ProviderSettings {
            base_url: None,
            api_key: Some("settings-key".into()),
        };
        let c = ProviderClient::new(ProviderKey::OpenAi, None, None, None, Some(&settings));
        assert_eq!(c.api_key.as_deref(), Some("settings-key"));
    }

    #[tokio::test]
    async fn test_missing_key_degrades_to_empty() {
        let c = ProviderClient::new(ProviderKey::OpenAi, None, None, None, None);
        assert!(c.list_models().await.is_empty());
    }

    #[tokio::test]
    async fn test_injected_catalog_failure_degrades_to_empty() {
        struct Failing;
        #[async_trait]
        impl ModelCatalog for Failing {
            async fn list_models(&self) -> anyhow::Result<Vec<ProviderModel>> {
                anyhow::bail!("boom")
            }
        }
        let c = ProviderClient::new(ProviderKey::Anthropic, None, Some("k".into()), None, None)
            .with_catalog(Arc::new(Failing));
        assert!(c.list_models().await.is_empty());
    }

    #[test]
    fn test_parse_openrouter_shape() {
        let body = json!({"data": [{
            "id": "anthropic/claude-sonnet-4",
            "name": "Claude Sonnet 4",
            "description": "Fast and capable",
            "context_length": 200000,
            "pricing": {"prompt": "0.000003"},
            "top_provider": {"max_completion_tokens": 64000}
        }]});
        let models = parse_models(ProviderKey::OpenRouter, &body).unwrap();
        assert_eq!(models.len(), 1);
        let m = &models[0];
        assert_eq!(m.id, "anthropic/claude-sonnet-4");
        assert_eq!(m.name, "Claude Sonnet 4");
        assert_eq!(m.context_window, Some(200000));
        assert_eq!(m.max_output_tokens, Some(64000));
        assert!(m.pricing.is_some());
    }

    #[test]
    fn test_parse_groq_shape() {
        let body = json!({"data": [{
            "id": "llama-3.3-70b-versatile",
            "object": "model",
            "context_window": 131072,
            "active": true
        }]});
        let models = parse_models(ProviderKey::Groq, &body).unwrap();
        assert_eq!(models[0].name, "llama-3.3-70b-versatile");
        assert_eq!(models[0].context_window, Some(131072));
        assert_eq!(models[0].is_active, Some(true));
        assert!(models[0].description.is_none());
    }

    #[test]
    fn test_parse_anthropic_display_name() {
        let body = json!({"data": [{"id": "claude-sonnet-4-20250514", "display_name": "Claude Sonnet 4"}]});
        let models = parse_models(ProviderKey::Anthropic, &body).unwrap();
        assert_eq!(models[0].name, "Claude Sonnet 4");
        // Anthropic's schema carries no context window; never guessed.
        assert!(models[0].context_window.is_none());
    }

    #[test]
    fn test_parse_imagerouter_keyed_object() {
        let body = json!({
            "stable-diffusion-3.5": {"providers": ["replicate"], "pricing": {"type": "fixed"}},
            "flux-1.1-pro": {"providers": ["bfl"]}
        });
        let mut models = parse_models(ProviderKey::ImageRouter, &body).unwrap();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "flux-1.1-pro");
        assert!(models[0].metadata.is_some());
    }

    #[test]
    fn test_parse_rejects_unknown_shape() {
        assert!(parse_models(ProviderKey::OpenAi, &json!({"models": []})).is_err());
    }
}
