//! Wire types shared by the catalogue clients and the chat orchestrator.
//!
//! `ProviderModel` is the normalized, transient projection of one raw
//! catalogue entry; fields a provider's schema does not carry stay `None`
//! rather than being guessed. The completion response shapes tolerate the
//! content variants seen in the wild (plain string or list of fragments).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProviderKey;

/// One model from a provider's live catalogue. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModel {
    pub provider: ProviderKey,
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ProviderModel {
    /// Minimal entry: id doubles as the display name.
    pub fn bare(provider: ProviderKey, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            provider,
            name: id.clone(),
            id,
            description: None,
            context_window: None,
            max_output_tokens: None,
            pricing: None,
            is_active: None,
            metadata: None,
        }
    }
}

/// A single prompt message sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

// ── Completion response wire shapes ─────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<Value>,
}

impl ChoiceMessage {
    /// Flatten the content into one string. Providers return either a plain
    /// string or a list of `{"type": "text", "text": ...}` fragments; the
    /// fragments are joined in order.
    pub fn text(&self) -> String {
        match &self.content {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|p| {
                    p.get("text")
                        .and_then(|t| t.as_str())
                        .or_else(|| p.as_str())
                })
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        }
    }
}
