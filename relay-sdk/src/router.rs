//! Router (C8, §4.8): resolves a model, builds the live candidate list, and
//! delegates selection + dispatch to the Strategy Engine.

use crate::domain::Id;
use crate::error::RouterError;
use crate::models::{ChatRequest, ChatResponse};
use crate::pool::{AdapterPool, RoundRobinCounters};
use crate::registry::Registry;
use crate::repository::Repository;
use crate::strategy::{self, Strategy, StrategyParams};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Router {
    repo: Arc<dyn Repository>,
    registry: Arc<Registry>,
    pool: Arc<AdapterPool>,
    counters: RoundRobinCounters,
    refresh_lock: Mutex<()>,
}

impl Router {
    pub fn new(repo: Arc<dyn Repository>, registry: Arc<Registry>, pool: Arc<AdapterPool>) -> Self {
        Self {
            repo,
            registry,
            pool,
            counters: RoundRobinCounters::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Step 1 of §4.8: resolve, and on a cache/config miss refresh once
    /// under a single-flight lock before giving up.
    async fn resolve_or_refresh(&self, model_name: &str) -> Option<crate::domain::ResolvedConfig> {
        if let Some(cfg) = self.registry.resolve(model_name).await {
            return Some(cfg);
        }
        let _guard = self.refresh_lock.lock().await;
        if let Some(cfg) = self.registry.resolve(model_name).await {
            return Some(cfg);
        }
        self.registry.refresh_all().await;
        self.registry.resolve(model_name).await
    }

    /// Resolve → build the live candidate list → choose the model's
    /// strategy. Shared by both the unary and streaming entry points.
    async fn prepare(
        &self,
        model_name: &str,
        strategy_override: Option<&str>,
    ) -> Result<(Id, Vec<strategy::ProviderInfo>, Strategy, StrategyParams), RouterError> {
        let resolved = self
            .resolve_or_refresh(model_name)
            .await
            .ok_or_else(|| RouterError::NotFound {
                what: format!("model '{model_name}'"),
            })?;

        let model_id: Id = resolved.model.id;
        let links = self.repo.get_enabled_links_for_model(model_id).await;
        let link_by_provider: std::collections::HashMap<Id, _> =
            links.iter().map(|l| (l.provider_id, l)).collect();

        let now = crate::domain::now_ts();
        let mut candidates = Vec::with_capacity(resolved.providers.len());
        let mut breaker_open_provider: Option<String> = None;
        for provider in &resolved.providers {
            let Some(link) = link_by_provider.get(&provider.provider_id) else {
                continue;
            };
            if link.breaker_is_open(now) {
                breaker_open_provider.get_or_insert_with(|| provider.name.clone());
                continue;
            }
            let current_connections = self.pool.in_use_count(model_name, &provider.name).await;
            candidates.push(strategy::provider_info(provider, link, current_connections));
        }

        if candidates.is_empty() {
            if let Some(provider) = breaker_open_provider {
                return Err(RouterError::CircuitOpen {
                    model: model_name.to_string(),
                    provider,
                });
            }
            return Err(RouterError::AllProvidersUnavailable {
                model: model_name.to_string(),
                tried: 0,
            });
        }

        let (strategy, params) = self.choose_strategy(&links, strategy_override);
        Ok((model_id, candidates, strategy, params))
    }

    /// Full dispatch flow: resolve → build candidates → choose strategy →
    /// delegate to the Strategy Engine. `strategy_override` models a
    /// request-level `specified_provider` choice that takes precedence over
    /// the model's configured strategy (§4.8 step 4).
    pub async fn chat_completion(
        &self,
        request: ChatRequest,
        strategy_override: Option<&str>,
    ) -> Result<ChatResponse, RouterError> {
        let model_name = request.model.clone();
        let (model_id, candidates, strategy, params) =
            self.prepare(&model_name, strategy_override).await?;

        strategy::execute(
            &self.repo,
            &self.pool,
            &self.counters,
            model_id,
            &model_name,
            request,
            &candidates,
            strategy,
            &params,
        )
        .await
    }

    /// Streaming counterpart of [`Router::chat_completion`] (§4.9/§4.10):
    /// same resolve/candidate/strategy pipeline, handing back an open
    /// stream instead of a full response.
    pub async fn stream_chat_completion(
        &self,
        request: ChatRequest,
        strategy_override: Option<&str>,
    ) -> Result<strategy::StreamDispatch, RouterError> {
        let model_name = request.model.clone();
        let (model_id, candidates, strategy, params) =
            self.prepare(&model_name, strategy_override).await?;

        strategy::execute_stream(
            &self.repo,
            &self.pool,
            &self.counters,
            model_id,
            &model_name,
            request,
            &candidates,
            strategy,
            &params,
        )
        .await
    }

    /// Lists enabled model names, for the "unknown model" 400 response's
    /// `available_models` list (§6).
    pub async fn available_models(&self) -> Vec<String> {
        self.repo
            .get_all_models(true)
            .await
            .into_iter()
            .map(|m| m.name)
            .collect()
    }

    /// A request-level `specified_provider` wins outright; otherwise the
    /// model's configured strategy (taken from the first declared link,
    /// since one model declares one strategy across all of its links) applies.
    fn choose_strategy(
        &self,
        links: &[crate::domain::ModelProviderLink],
        strategy_override: Option<&str>,
    ) -> (Strategy, StrategyParams) {
        if let Some(provider_name) = strategy_override {
            return (
                Strategy::SpecifiedProvider,
                StrategyParams {
                    specified_provider: Some(provider_name.to_string()),
                    ..Default::default()
                },
            );
        }

        let Some(first) = links.first() else {
            return (Strategy::Auto, StrategyParams::default());
        };

        let strategy = Strategy::parse(&first.strategy).unwrap_or(Strategy::Auto);
        let params = StrategyParams {
            specified_provider: first.strategy_config.specified_provider.clone(),
            preferred_provider: first.strategy_config.preferred_provider.clone(),
            max_cost_threshold: first.strategy_config.max_cost_threshold,
        };
        (strategy, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApiKey, LlmType, Model, ModelProviderLink, Provider, ProviderType};
    use crate::repository::InMemoryRepository;

    fn seeded_router() -> Router {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_model(Model {
            id: 1,
            name: "gpt-4o".to_string(),
            llm_type: LlmType::Chat,
            is_enabled: true,
            updated_at: 1,
        })
        .unwrap();
        repo.insert_provider(Provider {
            id: 1,
            name: "openai-primary".to_string(),
            provider_type: ProviderType::Openai,
            official_endpoint: Some("https://api.openai.com".to_string()),
            third_party_endpoint: None,
            is_enabled: true,
        });
        repo.insert_api_key(ApiKey {
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

        let registry = Arc::new(Registry::new(repo.clone()));
        let pool = Arc::new(AdapterPool::new());
        Router::new(repo, registry, pool)
    }

    #[tokio::test]
    async fn open_breaker_excludes_sole_candidate_as_circuit_open() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.insert_model(Model {
            id: 1,
            name: "gpt-4o".to_string(),
            llm_type: LlmType::Chat,
            is_enabled: true,
            updated_at: 1,
        })
        .unwrap();
        repo.insert_provider(Provider {
            id: 1,
            name: "openai-primary".to_string(),
            provider_type: ProviderType::Openai,
            official_endpoint: Some("https://api.openai.com".to_string()),
            third_party_endpoint: None,
            is_enabled: true,
        });
        repo.insert_api_key(ApiKey {
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
        let mut link = ModelProviderLink::new(1, 1, 1, 0);
        link.circuit_breaker.enabled = true;
        link.circuit_breaker.threshold = 1;
        link.circuit_breaker.timeout_secs = 60;
        link.failure_count = 1;
        link.last_failure_time = Some(crate::domain::now_ts());
        repo.insert_link(link);

        let registry = Arc::new(Registry::new(repo.clone()));
        let pool = Arc::new(AdapterPool::new());
        let router = Router::new(repo, registry, pool);

        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![crate::models::Message::user("hi")],
            ..Default::default()
        };
        let err = router.chat_completion(request, None).await.unwrap_err();
        assert!(matches!(err, RouterError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let router = seeded_router();
        let request = ChatRequest {
            model: "does-not-exist".to_string(),
            messages: vec![crate::models::Message::user("hi")],
            ..Default::default()
        };
        let err = router.chat_completion(request, None).await.unwrap_err();
        assert!(matches!(err, RouterError::NotFound { .. }));
    }
}
