//! Provider identity and catalogue clients.
//!
//! [`ProviderKey`] is the closed set of supported LLM vendors. The `client`
//! module builds one catalogue client per configured provider; `types` holds
//! the normalized model projection and the wire shapes shared with the chat
//! orchestrator.

pub mod client;
pub mod types;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The supported third-party LLM vendors. Adding a provider means adding a
/// variant here plus its parse arm in [`client`] — nothing is duck-typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKey {
    OpenAi,
    Groq,
    OpenRouter,
    Anthropic,
    DeepSeek,
    Mistral,
    ImageRouter,
}

impl ProviderKey {
    /// Every provider the service knows out of the box, in display order.
    pub fn well_known() -> [ProviderKey; 7] {
        [
            Self::OpenAi,
            Self::Groq,
            Self::OpenRouter,
            Self::Anthropic,
            Self::DeepSeek,
            Self::Mistral,
            Self::ImageRouter,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
            Self::OpenRouter => "openrouter",
            Self::Anthropic => "anthropic",
            Self::DeepSeek => "deepseek",
            Self::Mistral => "mistral",
            Self::ImageRouter => "imagerouter",
        }
    }

    /// Hard-coded default API endpoint, overridable by settings or by a
    /// user's stored base-url.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Mistral => "https://api.mistral.ai/v1",
            Self::ImageRouter => "https://api.imagerouter.io/v1",
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "groq" => Ok(Self::Groq),
            "openrouter" => Ok(Self::OpenRouter),
            "anthropic" => Ok(Self::Anthropic),
            "deepseek" => Ok(Self::DeepSeek),
            "mistral" => Ok(Self::Mistral),
            "imagerouter" => Ok(Self::ImageRouter),
            other => Err(CoreError::Validation(format!("unknown provider: {other}"))),
        }
    }
}
