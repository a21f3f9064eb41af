//! Registry (C2, §4.2): resolves a model name to a `ResolvedConfig`,
//! caching the result keyed by the Repository's own `updated_at` version.

use crate::domain::{ProviderType, ResolvedConfig, ResolvedProvider};
use crate::repository::Repository;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Clone)]
struct CacheEntry {
    config: ResolvedConfig,
    updated_at: i64,
}

/// Caches `ResolvedConfig` per model name; a cache hit requires only the
/// cheap `getModelUpdatedAt` version check (§4.2 step 1).
pub struct Registry {
    repo: Arc<dyn Repository>,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl Registry {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// `resolve(modelName) → ResolvedConfig?` (§4.2).
    pub async fn resolve(&self, model_name: &str) -> Option<ResolvedConfig> {
        if let Some(current) = self.repo.get_model_updated_at(model_name).await {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(model_name) {
                if entry.updated_at == current {
                    return Some(entry.config.clone());
                }
            }
        }
        self.build_and_cache(model_name).await
    }

    async fn build_and_cache(&self, model_name: &str) -> Option<ResolvedConfig> {
        let model = self.repo.get_model_by_name(model_name).await?;
        if !model.is_enabled {
            return None;
        }

        let links = self.repo.get_enabled_links_for_model(model.id).await;
        let mut providers = Vec::with_capacity(links.len());
        for link in links {
            let Some(provider) = self.repo.get_provider_by_id(link.provider_id).await else {
                warn!(model = %model_name, provider_id = link.provider_id, "skipping link: provider missing");
                continue;
            };
            if !provider.is_enabled {
                warn!(model = %model_name, provider_id = provider.id, "skipping link: provider disabled");
                continue;
            }
            let Some(base_url) = provider.base_url().map(str::to_owned) else {
                warn!(model = %model_name, provider_id = provider.id, "skipping link: no base url");
                continue;
            };
            let Some(api_key) = self.repo.get_best_api_key(provider.id).await else {
                warn!(model = %model_name, provider_id = provider.id, "skipping link: no usable api key");
                continue;
            };

            providers.push(ResolvedProvider {
                provider_id: provider.id,
                name: provider.name.clone(),
                provider_type: provider.provider_type,
                base_url,
                api_key: api_key.secret,
                api_key_id: api_key.id,
                weight: link.weight,
                priority: link.priority,
                is_preferred: link.is_preferred,
                cost_per_1k_tokens: link.cost_per_1k_tokens,
                params: merge_params(&link.strategy_config, provider.provider_type),
            });
        }

        if providers.is_empty() {
            return None;
        }

        let config = ResolvedConfig {
            model: model.clone(),
            providers,
            updated_at: model.updated_at,
        };

        let mut cache = self.cache.write().await;
        cache.insert(
            model_name.to_string(),
            CacheEntry {
                config: config.clone(),
                updated_at: model.updated_at,
            },
        );
        Some(config)
    }

    /// Clears the cache and preloads every enabled model (§4.2: called at
    /// startup and on an external config-reload callback).
    pub async fn refresh_all(&self) {
        self.cache.write().await.clear();
        let models = self.repo.get_all_models(true).await;
        for model in models {
            self.build_and_cache(&model.name).await;
        }
    }
}

/// Per-link params merged with generic (`provider_id = null`) params;
/// per-link overrides generic. Only `timeout`/`retry_count` carry documented
/// defaults today; the rest is left to the Adapter.
fn merge_params(strategy_config: &crate::domain::StrategyConfig, _provider_type: ProviderType) -> HashMap<String, String> {
    let mut params = HashMap::new();
    params.insert("timeout".to_string(), "30".to_string());
    params.insert("retry_count".to_string(), "2".to_string());
    if let Some(max_cost) = strategy_config.max_cost_threshold {
        params.insert("max_cost_threshold".to_string(), max_cost.to_string());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LlmType, Model, ModelProviderLink};
    use crate::repository::InMemoryRepository;

    fn seeded_repo() -> Arc<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_model(Model {
            id: 1,
            name: "gpt-4o".to_string(),
            llm_type: LlmType::Chat,
            is_enabled: true,
            updated_at: 1,
        })
        .unwrap();
        repo.insert_provider(crate::domain::Provider {
            id: 1,
            name: "openai-primary".to_string(),
            provider_type: ProviderType::Openai,
            official_endpoint: Some("https://api.openai.com".to_string()),
            third_party_endpoint: None,
            is_enabled: true,
        });
        repo.insert_api_key(crate::domain::ApiKey {
            id: 1,
            provider_id: 1,
            name: None,
            secret: "sk-test".to_string(),
            weight: 1,
            is_preferred: false,
            is_enabled: true,
            daily_quota: None,
            usage_count: 0,
        });
        repo.insert_link(ModelProviderLink::new(1, 1, 1, 0));
        repo
    }

    #[tokio::test]
    async fn resolves_model_with_one_usable_provider() {
        let repo = seeded_repo();
        let registry = Registry::new(repo.clone());
        let resolved = registry.resolve("gpt-4o").await.unwrap();
        assert_eq!(resolved.providers.len(), 1);
        assert_eq!(resolved.providers[0].api_key, "sk-test");
    }

    #[tokio::test]
    async fn unknown_model_resolves_to_none() {
        let repo = seeded_repo();
        let registry = Registry::new(repo);
        assert!(registry.resolve("does-not-exist").await.is_none());
    }

    #[tokio::test]
    async fn cache_hit_returns_same_updated_at_without_rebuild() {
        let repo = seeded_repo();
        let registry = Registry::new(repo.clone());
        let first = registry.resolve("gpt-4o").await.unwrap();
        let second = registry.resolve("gpt-4o").await.unwrap();
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn stale_cache_is_rebuilt_after_touch() {
        let repo = seeded_repo();
        let registry = Registry::new(repo.clone());
        registry.resolve("gpt-4o").await.unwrap();
        repo.touch_model(1);
        let refreshed = registry.resolve("gpt-4o").await.unwrap();
        assert_eq!(refreshed.model.id, 1);
    }

    #[tokio::test]
    async fn model_with_zero_usable_links_resolves_to_none() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_model(Model {
            id: 2,
            name: "no-providers".to_string(),
            llm_type: LlmType::Chat,
            is_enabled: true,
            updated_at: 1,
        })
        .unwrap();
        let registry = Registry::new(repo);
        assert!(registry.resolve("no-providers").await.is_none());
    }

    #[tokio::test]
    async fn refresh_all_preloads_enabled_models() {
        let repo = seeded_repo();
        let registry = Registry::new(repo);
        registry.refresh_all().await;
        assert!(registry.cache.read().await.contains_key("gpt-4o"));
    }
}
