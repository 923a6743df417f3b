//! Aggregated model catalogue across every configured provider.
//!
//! One client per active provider record, all queried concurrently, results
//! concatenated. Per-provider failures were already swallowed to an empty
//! list inside the client, so a single bad provider never aborts its
//! siblings — the fan-out joins independent failure domains.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::config::ProviderSettings;
use crate::credentials::ResolvedProviderConfig;
use crate::provider::client::{ModelCatalog, ProviderClient};
use crate::provider::types::ProviderModel;
use crate::provider::ProviderKey;

/// Optional post-union filter. All present conditions must hold;
/// an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    /// Case-insensitive substring of the model name.
    pub name_contains: Option<String>,
    /// Case-insensitive substring of the model id.
    pub id_contains: Option<String>,
    /// Free-text match across name, id, description, and stringified metadata.
    pub query: Option<String>,
}

impl ModelFilter {
    pub fn is_empty(&self) -> bool {
        self.name_contains.is_none() && self.id_contains.is_none() && self.query.is_none()
    }

    pub fn matches(&self, model: &ProviderModel) -> bool {
        let contains = |haystack: &str, needle: &str| {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        };

        if let Some(needle) = &self.name_contains {
            if !contains(&model.name, needle) {
                return false;
            }
        }
        if let Some(needle) = &self.id_contains {
            if !contains(&model.id, needle) {
                return false;
            }
        }
        if let Some(needle) = &self.query {
            let mut haystack = format!("{} {}", model.name, model.id);
            if let Some(description) = &model.description {
                haystack.push(' ');
                haystack.push_str(description);
            }
            if let Some(metadata) = &model.metadata {
                haystack.push(' ');
                haystack.push_str(&metadata.to_string());
            }
            if !contains(&haystack, needle) {
                return false;
            }
        }
        true
    }
}

/// Fan-out aggregator over per-provider catalogue clients.
#[derive(Clone)]
pub struct ProviderCatalog {
    settings: HashMap<ProviderKey, ProviderSettings>,
    overrides: HashMap<ProviderKey, Arc<dyn ModelCatalog>>,
}

impl ProviderCatalog {
    pub fn new(settings: HashMap<ProviderKey, ProviderSettings>) -> Self {
        Self {
            settings,
            overrides: HashMap::new(),
        }
    }

    /// Route one provider's catalogue through an injected source instead of
    /// the client's own transport (real SDK clients, test stubs).
    pub fn with_catalog(mut self, provider: ProviderKey, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.overrides.insert(provider, catalog);
        self
    }

    fn client_for(&self, config: &ResolvedProviderConfig) -> ProviderClient {
        let client = ProviderClient::new(
            config.provider,
            config.base_url.clone(),
            config.api_key.clone(),
            config.metadata.as_ref(),
            self.settings.get(&config.provider),
        );
        match self.overrides.get(&config.provider) {
            Some(catalog) => client.with_catalog(catalog.clone()),
            None => client,
        }
    }

    /// Union of every active provider's catalogue. No cross-provider
    /// ordering is guaranteed beyond per-provider grouping.
    pub async fn list_all_models(
        &self,
        configs: &[ResolvedProviderConfig],
        filter: Option<&ModelFilter>,
    ) -> Vec<ProviderModel> {
        let clients: Vec<ProviderClient> = configs
            .iter()
            .filter(|c| c.is_active)
            .map(|c| self.client_for(c))
            .collect();
        aggregate(&clients, filter).await
    }

    /// One provider's catalogue, honoring the same filter semantics.
    pub async fn list_models_for_provider(
        &self,
        provider: ProviderKey,
        configs: &[ResolvedProviderConfig],
        filter: Option<&ModelFilter>,
    ) -> Vec<ProviderModel> {
        let clients: Vec<ProviderClient> = configs
            .iter()
            .filter(|c| c.is_active && c.provider == provider)
            .map(|c| self.client_for(c))
            .collect();
        aggregate(&clients, filter).await
    }
}

async fn aggregate(clients: &[ProviderClient], filter: Option<&ModelFilter>) -> Vec<ProviderModel> {
    let results = join_all(clients.iter().map(|c| c.list_models())).await;
    let union = results.into_iter().flatten();
    match filter {
        Some(f) if !f.is_empty() => union.filter(|m| f.matches(m)).collect(),
        _ => union.collect(),
    }
}
