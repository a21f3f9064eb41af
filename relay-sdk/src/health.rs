//! Health Checker (C6, §4.6): probes Adapters for every usable provider of
//! a model (or every model) and writes health transitions through the
//! Repository.

use crate::domain::{HealthStatus, Id};
use crate::providers::{create_adapter, AdapterConfig};
use crate::registry::Registry;
use crate::repository::Repository;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// Aggregate status across every provider behind a model. Distinct from
/// [`HealthStatus`], which lives at the single-link level — `Unknown` only
/// makes sense once you're summarizing zero-or-more probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

fn aggregate(statuses: &[HealthStatus]) -> AggregateStatus {
    if statuses.is_empty() {
        return AggregateStatus::Unknown;
    }
    if statuses.iter().all(|s| *s == HealthStatus::Healthy) {
        AggregateStatus::Healthy
    } else if statuses.iter().all(|s| *s == HealthStatus::Unhealthy) {
        AggregateStatus::Unhealthy
    } else {
        AggregateStatus::Degraded
    }
}

type SweepResult = Arc<HashMap<String, AggregateStatus>>;
type SweepFuture = Shared<BoxFuture<'static, SweepResult>>;

pub struct HealthChecker {
    repo: Arc<dyn Repository>,
    registry: Arc<Registry>,
    inflight: Mutex<Option<SweepFuture>>,
}

impl HealthChecker {
    pub fn new(repo: Arc<dyn Repository>, registry: Arc<Registry>) -> Self {
        Self {
            repo,
            registry,
            inflight: Mutex::new(None),
        }
    }

    /// Probes every usable provider behind one model, concurrently, falling
    /// back to sequential execution if `per_task_timeout` elapses before all
    /// probes finish — a partial result, not an error (§4.6).
    pub async fn check_model(&self, model_name: &str, per_task_timeout: Duration) -> AggregateStatus {
        let Some(resolved) = self.registry.resolve(model_name).await else {
            return AggregateStatus::Unknown;
        };

        let concurrent = futures::future::join_all(resolved.providers.iter().map(|provider| {
            let repo = self.repo.clone();
            let provider = provider.clone();
            let model_id = resolved.model.id;
            async move { probe_one(&repo, model_id, &provider).await }
        }));

        let statuses = match tokio::time::timeout(per_task_timeout, concurrent).await {
            Ok(statuses) => statuses,
            Err(_) => {
                warn!(model = model_name, "concurrent health sweep timed out, falling back to sequential");
                let mut statuses = Vec::with_capacity(resolved.providers.len());
                for provider in &resolved.providers {
                    statuses.push(probe_one(&self.repo, resolved.model.id, provider).await);
                }
                statuses
            }
        };

        aggregate(&statuses)
    }

    /// Fans out `check_model` across every named model within a shared
    /// deadline. At most one sweep runs at a time; a concurrent call joins
    /// the in-progress sweep instead of starting a second one (§5).
    pub async fn check_all(&self, model_names: Vec<String>, global_timeout: Duration) -> SweepResult {
        let mut guard = self.inflight.lock().await;
        if let Some(existing) = guard.as_ref() {
            let existing = existing.clone();
            drop(guard);
            return existing.await;
        }

        let repo = self.repo.clone();
        let registry = self.registry.clone();
        let fut: BoxFuture<'static, SweepResult> = Box::pin(async move {
            let checker = HealthChecker {
                repo,
                registry,
                inflight: Mutex::new(None),
            };
            let per_model_timeout = global_timeout;
            let results = futures::future::join_all(model_names.iter().map(|name| {
                let checker = &checker;
                async move { (name.clone(), checker.check_model(name, per_model_timeout).await) }
            }))
            .await;
            Arc::new(results.into_iter().collect())
        });
        let shared = fut.shared();
        *guard = Some(shared.clone());
        drop(guard);

        let result = shared.await;
        *self.inflight.lock().await = None;
        result
    }
}

/// One Adapter construction + probe + write-through. Exceptions are
/// isolated to this provider — they never cancel sibling probes.
async fn probe_one(
    repo: &Arc<dyn Repository>,
    model_id: Id,
    provider: &crate::domain::ResolvedProvider,
) -> HealthStatus {
    let config = AdapterConfig::new(provider.base_url.clone(), provider.api_key.clone());
    let status = match create_adapter(provider.provider_type, config) {
        Ok(adapter) => adapter.health_check().await.unwrap_or(HealthStatus::Unhealthy),
        Err(_) => HealthStatus::Unhealthy,
    };

    if let Err(e) = repo.update_link_health(model_id, provider.provider_id, status).await {
        warn!(provider = %provider.name, error = %e, "failed to write health status");
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_healthy_aggregates_healthy() {
        assert_eq!(
            aggregate(&[HealthStatus::Healthy, HealthStatus::Healthy]),
            AggregateStatus::Healthy
        );
    }

    #[test]
    fn all_unhealthy_aggregates_unhealthy() {
        assert_eq!(
            aggregate(&[HealthStatus::Unhealthy, HealthStatus::Unhealthy]),
            AggregateStatus::Unhealthy
        );
    }

    #[test]
    fn mixed_aggregates_degraded() {
        assert_eq!(
            aggregate(&[HealthStatus::Healthy, HealthStatus::Unhealthy]),
            AggregateStatus::Degraded
        );
    }

    #[test]
    fn no_probes_aggregates_unknown() {
        assert_eq!(aggregate(&[]), AggregateStatus::Unknown);
    }
}
