//! Repository (C1, §4.1): typed reads/writes over the persistent domain.
//!
//! This is the one component the specification treats as an external
//! collaborator — a real deployment backs this trait with a connection pool
//! against Postgres/MySQL. `InMemoryRepository` is the reference
//! implementation used by the rest of the crate and by tests; it honors the
//! same failure modes (`NotFound` → `None`, unique-key violation →
//! `RouterError::Conflict`) a database-backed implementation would.

use crate::domain::{ApiKey, Capability, HealthStatus, Id, Model, ModelProviderLink, Provider};
use crate::error::RouterError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct LinkMetricsUpdate {
    pub response_time_secs: f64,
    pub success: bool,
    pub tokens: u64,
    pub cost: f64,
}

/// Typed reads/writes over models, providers, API keys, links, and
/// capabilities. See §4.1 for the full operation list.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_all_models(&self, enabled_only: bool) -> Vec<Model>;
    async fn get_model_by_name(&self, name: &str) -> Option<Model>;
    /// Cheap, O(1) version check used by the Registry's cache (§4.2 step 1).
    async fn get_model_updated_at(&self, name: &str) -> Option<i64>;
    async fn get_enabled_links_for_model(&self, model_id: Id) -> Vec<ModelProviderLink>;
    async fn get_provider_by_id(&self, id: Id) -> Option<Provider>;
    /// Credential Selector (§4.3).
    async fn get_best_api_key(&self, provider_id: Id) -> Option<ApiKey>;
    async fn get_all_models_capabilities_batch(
        &self,
        ids: &[Id],
    ) -> HashMap<Id, Vec<Capability>>;
    /// Batched `modelId -> [providerDetail]` lookup (§4.1), joining each
    /// model's enabled links to their Provider rows in one call.
    async fn get_all_models_providers_batch(&self, ids: &[Id]) -> HashMap<Id, Vec<Provider>>;

    async fn update_link_metrics(
        &self,
        model_id: Id,
        provider_id: Id,
        update: LinkMetricsUpdate,
    ) -> Result<(), RouterError>;
    async fn update_link_health(
        &self,
        model_id: Id,
        provider_id: Id,
        status: HealthStatus,
    ) -> Result<(), RouterError>;
    async fn increment_failure_count(&self, model_id: Id, provider_id: Id) -> Result<(), RouterError>;
    async fn reset_failure_count(&self, model_id: Id, provider_id: Id) -> Result<(), RouterError>;
    async fn increment_api_key_usage(&self, api_key_id: Id) -> Result<(), RouterError>;
}

#[derive(Default)]
struct Store {
    models: HashMap<Id, Model>,
    models_by_name: HashMap<String, Id>,
    providers: HashMap<Id, Provider>,
    api_keys: HashMap<Id, ApiKey>,
    links: HashMap<(Id, Id), ModelProviderLink>,
    capabilities: HashMap<Id, Vec<Capability>>,
}

/// In-process reference implementation of [`Repository`], guarded by a
/// single `RwLock` (reads are the hot path; writes are infrequent admin
/// operations and rare metric flushes).
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self {
            store: RwLock::new(Store::default()),
        }
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_model(&self, model: Model) -> Result<(), RouterError> {
        let mut store = self.store.write().unwrap();
        if store.models_by_name.contains_key(&model.name) {
            return Err(RouterError::Conflict {
                message: format!("model name '{}' already exists", model.name),
            });
        }
        store.models_by_name.insert(model.name.clone(), model.id);
        store.models.insert(model.id, model);
        Ok(())
    }

    pub fn insert_provider(&self, provider: Provider) {
        self.store.write().unwrap().providers.insert(provider.id, provider);
    }

    pub fn insert_api_key(&self, key: ApiKey) {
        self.store.write().unwrap().api_keys.insert(key.id, key);
    }

    pub fn insert_link(&self, link: ModelProviderLink) {
        self.store
            .write()
            .unwrap()
            .links
            .insert((link.model_id, link.provider_id), link);
    }

    pub fn set_capabilities(&self, model_id: Id, caps: Vec<Capability>) {
        self.store.write().unwrap().capabilities.insert(model_id, caps);
    }

    /// Bumps `updated_at` on a Model, the way any admin mutation that
    /// affects routing must (§3 invariant).
    pub fn touch_model(&self, model_id: Id) {
        if let Some(m) = self.store.write().unwrap().models.get_mut(&model_id) {
            m.touch();
        }
    }

    pub fn with_link_mut<R>(
        &self,
        model_id: Id,
        provider_id: Id,
        f: impl FnOnce(&mut ModelProviderLink) -> R,
    ) -> Option<R> {
        self.store
            .write()
            .unwrap()
            .links
            .get_mut(&(model_id, provider_id))
            .map(f)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_all_models(&self, enabled_only: bool) -> Vec<Model> {
        self.store
            .read()
            .unwrap()
            .models
            .values()
            .filter(|m| !enabled_only || m.is_enabled)
            .cloned()
            .collect()
    }

    async fn get_model_by_name(&self, name: &str) -> Option<Model> {
        let store = self.store.read().unwrap();
        let id = store.models_by_name.get(name)?;
        store.models.get(id).cloned()
    }

    async fn get_model_updated_at(&self, name: &str) -> Option<i64> {
        let store = self.store.read().unwrap();
        let id = store.models_by_name.get(name)?;
        store.models.get(id).map(|m| m.updated_at)
    }

    async fn get_enabled_links_for_model(&self, model_id: Id) -> Vec<ModelProviderLink> {
        self.store
            .read()
            .unwrap()
            .links
            .values()
            .filter(|l| l.model_id == model_id && l.is_enabled)
            .cloned()
            .collect()
    }

    async fn get_provider_by_id(&self, id: Id) -> Option<Provider> {
        self.store.read().unwrap().providers.get(&id).cloned()
    }

    async fn get_best_api_key(&self, provider_id: Id) -> Option<ApiKey> {
        let store = self.store.read().unwrap();
        crate::credential::select_best_key(
            store
                .api_keys
                .values()
                .filter(|k| k.provider_id == provider_id),
        )
    }

    async fn get_all_models_capabilities_batch(
        &self,
        ids: &[Id],
    ) -> HashMap<Id, Vec<Capability>> {
        let store = self.store.read().unwrap();
        ids.iter()
            .filter_map(|id| store.capabilities.get(id).map(|c| (*id, c.clone())))
            .collect()
    }

    async fn get_all_models_providers_batch(&self, ids: &[Id]) -> HashMap<Id, Vec<Provider>> {
        let store = self.store.read().unwrap();
        ids.iter()
            .map(|&model_id| {
                let providers = store
                    .links
                    .values()
                    .filter(|l| l.model_id == model_id && l.is_enabled)
                    .filter_map(|l| store.providers.get(&l.provider_id).cloned())
                    .collect();
                (model_id, providers)
            })
            .collect()
    }

    async fn update_link_metrics(
        &self,
        model_id: Id,
        provider_id: Id,
        update: LinkMetricsUpdate,
    ) -> Result<(), RouterError> {
        let found = self.with_link_mut(model_id, provider_id, |l| {
            l.record_outcome(
                update.response_time_secs,
                update.success,
                update.tokens,
                update.cost,
            )
        });
        found.ok_or_else(|| RouterError::not_found(format!("link {model_id}/{provider_id}")))
    }

    async fn update_link_health(
        &self,
        model_id: Id,
        provider_id: Id,
        status: HealthStatus,
    ) -> Result<(), RouterError> {
        let found = self.with_link_mut(model_id, provider_id, |l| {
            l.health_status = status;
            l.last_health_check = Some(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0),
            );
            l.recompute_scores();
        });
        found.ok_or_else(|| RouterError::not_found(format!("link {model_id}/{provider_id}")))
    }

    async fn increment_failure_count(&self, model_id: Id, provider_id: Id) -> Result<(), RouterError> {
        let found = self.with_link_mut(model_id, provider_id, |l| l.failure_count += 1);
        found.ok_or_else(|| RouterError::not_found(format!("link {model_id}/{provider_id}")))
    }

    async fn reset_failure_count(&self, model_id: Id, provider_id: Id) -> Result<(), RouterError> {
        let found = self.with_link_mut(model_id, provider_id, |l| l.failure_count = 0);
        found.ok_or_else(|| RouterError::not_found(format!("link {model_id}/{provider_id}")))
    }

    async fn increment_api_key_usage(&self, api_key_id: Id) -> Result<(), RouterError> {
        let mut store = self.store.write().unwrap();
        let key = store
            .api_keys
            .get_mut(&api_key_id)
            .ok_or_else(|| RouterError::not_found(format!("api key {api_key_id}")))?;
        key.usage_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LlmType, ProviderType};

    fn repo_with_model() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.insert_model(Model {
            id: 1,
            name: "gpt-4o".to_string(),
            llm_type: LlmType::Chat,
            is_enabled: true,
            updated_at: 100,
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
        repo
    }

    #[tokio::test]
    async fn duplicate_model_name_is_conflict() {
        let repo = repo_with_model();
        let err = repo
            .insert_model(Model {
                id: 2,
                name: "gpt-4o".to_string(),
                llm_type: LlmType::Chat,
                is_enabled: true,
                updated_at: 1,
            })
            .unwrap_err();
        assert!(matches!(err, RouterError::Conflict { .. }));
    }

    #[tokio::test]
    async fn get_model_updated_at_is_cheap_lookup() {
        let repo = repo_with_model();
        assert_eq!(repo.get_model_updated_at("gpt-4o").await, Some(100));
        assert_eq!(repo.get_model_updated_at("missing").await, None);
    }

    #[tokio::test]
    async fn touch_model_advances_version() {
        let repo = repo_with_model();
        repo.touch_model(1);
        let updated = repo.get_model_updated_at("gpt-4o").await.unwrap();
        assert!(updated >= 100);
    }

    #[tokio::test]
    async fn providers_batch_joins_enabled_links_per_model() {
        let repo = repo_with_model();
        repo.insert_link(crate::domain::ModelProviderLink::new(1, 1, 1, 0));
        let batch = repo.get_all_models_providers_batch(&[1, 2]).await;
        assert_eq!(batch.get(&1).map(|p| p.len()), Some(1));
        assert_eq!(batch.get(&1).unwrap()[0].name, "openai-primary");
        assert_eq!(batch.get(&2).map(|p| p.len()), Some(0));
    }
}
