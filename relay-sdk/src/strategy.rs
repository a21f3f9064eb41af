//! Strategy Engine (C7, §4.7): picks a provider from a candidate list and
//! dispatches through the Adapter Pool, retrying across candidates on failure.

use crate::domain::{HealthStatus, Id, ModelProviderLink, ProviderType};
use crate::error::RouterError;
use crate::models::{ChatRequest, ChatResponse};
use crate::pool::{AdapterPool, RoundRobinCounters};
use crate::providers::AdapterConfig;
use crate::repository::{LinkMetricsUpdate, Repository};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// One candidate provider as seen by the Strategy Engine: the live metrics
/// off its `ModelProviderLink` joined with the adapter-construction shape
/// from the Registry's `ResolvedProvider`.
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub provider_id: Id,
    pub name: String,
    pub provider_type: ProviderType,
    pub base_url: String,
    pub api_key: String,
    pub api_key_id: Id,
    pub weight: u32,
    pub priority: i32,
    pub is_preferred: bool,
    pub health_status: HealthStatus,
    pub response_time_avg: f64,
    pub success_rate: f64,
    pub cost_per_1k_tokens: f64,
    pub overall_score: f64,
    pub current_connections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Auto,
    SpecifiedProvider,
    Fallback,
    WeightedRoundRobin,
    LeastConnections,
    ResponseTime,
    CostOptimized,
    Hybrid,
}

impl Strategy {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "auto" => Some(Self::Auto),
            "specified_provider" => Some(Self::SpecifiedProvider),
            "fallback" => Some(Self::Fallback),
            "weighted_round_robin" => Some(Self::WeightedRoundRobin),
            "least_connections" => Some(Self::LeastConnections),
            "response_time" => Some(Self::ResponseTime),
            "cost_optimized" => Some(Self::CostOptimized),
            "hybrid" => Some(Self::Hybrid),
            _ => None,
        }
    }
}

/// Per-execution knobs the strategies read (§4.7); all optional, with the
/// documented defaults applied when absent.
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    pub specified_provider: Option<String>,
    pub preferred_provider: Option<String>,
    pub max_cost_threshold: Option<f64>,
}

const DEFAULT_MAX_COST_THRESHOLD: f64 = 0.1;

/// Orders candidates for a strategy; the order IS the retry order.
fn order_candidates(
    strategy: Strategy,
    candidates: &[ProviderInfo],
    params: &StrategyParams,
    model_name: &str,
    counters: &RoundRobinCounters,
) -> Result<Vec<ProviderInfo>, RouterError> {
    let usable: Vec<ProviderInfo> = candidates
        .iter()
        .filter(|p| p.health_status != HealthStatus::Unhealthy)
        .cloned()
        .collect();

    match strategy {
        Strategy::SpecifiedProvider => {
            let target = params.specified_provider.as_deref().ok_or_else(|| {
                RouterError::ValidationError {
                    field: "specified_provider".to_string(),
                    message: "strategy requires specified_provider".to_string(),
                }
            })?;
            let found = usable.into_iter().find(|p| p.name == target);
            match found {
                Some(p) => Ok(vec![p]),
                None => Err(RouterError::NotFound {
                    what: format!("provider '{target}' for model '{model_name}'"),
                }),
            }
        }

        Strategy::Auto => {
            let mut ranked = usable;
            ranked.sort_by(|a, b| b.overall_score.partial_cmp(&a.overall_score).unwrap());
            ranked.truncate(3);
            Ok(ranked)
        }

        Strategy::Fallback => {
            let mut ranked = usable;
            ranked.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(b.overall_score.partial_cmp(&a.overall_score).unwrap())
                    .then(a.name.cmp(&b.name))
            });
            if let Some(preferred) = &params.preferred_provider {
                if let Some(pos) = ranked.iter().position(|p| &p.name == preferred) {
                    let p = ranked.remove(pos);
                    ranked.insert(0, p);
                }
            }
            Ok(ranked)
        }

        Strategy::WeightedRoundRobin => {
            if usable.is_empty() {
                return Ok(usable);
            }
            let total_weight: u64 = usable.iter().map(|p| p.weight as u64).sum();
            let position = counters.next(model_name, total_weight.max(1));
            let mut acc = 0u64;
            let mut start_idx = 0;
            for (idx, p) in usable.iter().enumerate() {
                acc += p.weight as u64;
                if position < acc {
                    start_idx = idx;
                    break;
                }
            }
            let mut ordered = usable.clone();
            ordered.rotate_left(start_idx);
            Ok(ordered)
        }

        Strategy::LeastConnections => {
            let mut ranked = usable;
            ranked.sort_by(|a, b| {
                a.current_connections
                    .cmp(&b.current_connections)
                    .then(b.overall_score.partial_cmp(&a.overall_score).unwrap())
            });
            Ok(ranked)
        }

        Strategy::ResponseTime => {
            let mut ranked = usable;
            ranked.sort_by(|a, b| {
                let ra = if a.response_time_avg == 0.0 {
                    f64::MAX
                } else {
                    a.response_time_avg
                };
                let rb = if b.response_time_avg == 0.0 {
                    f64::MAX
                } else {
                    b.response_time_avg
                };
                ra.partial_cmp(&rb)
                    .unwrap()
                    .then(b.overall_score.partial_cmp(&a.overall_score).unwrap())
            });
            Ok(ranked)
        }

        Strategy::CostOptimized => {
            let threshold = params.max_cost_threshold.unwrap_or(DEFAULT_MAX_COST_THRESHOLD);
            let mut within: Vec<ProviderInfo> = usable
                .iter()
                .filter(|p| p.cost_per_1k_tokens <= threshold)
                .cloned()
                .collect();
            let pool = if within.is_empty() { usable } else { std::mem::take(&mut within) };
            let mut ranked = pool;
            ranked.sort_by(|a, b| {
                a.cost_per_1k_tokens
                    .partial_cmp(&b.cost_per_1k_tokens)
                    .unwrap()
                    .then(b.overall_score.partial_cmp(&a.overall_score).unwrap())
            });
            Ok(ranked)
        }

        Strategy::Hybrid => {
            let mut ranked = usable;
            ranked.sort_by(|a, b| {
                hybrid_score(b)
                    .partial_cmp(&hybrid_score(a))
                    .unwrap()
                    .then(b.overall_score.partial_cmp(&a.overall_score).unwrap())
            });
            Ok(ranked)
        }
    }
}

fn hybrid_score(p: &ProviderInfo) -> f64 {
    0.4 * p.overall_score
        + 0.3 * (1.0 - p.response_time_avg / 10.0).max(0.0)
        + 0.2 * (1.0 - p.cost_per_1k_tokens / 0.1).max(0.0)
        + 0.1 * (1.0 - p.current_connections as f64 / 100.0).max(0.0)
}

/// Runs the three-step failure accounting of §4.7: bump `failure_count` and
/// `last_failure_time`, let the auto-disable check fire inside
/// `record_outcome`, then write the update through the Repository.
async fn record_failure(
    repo: &Arc<dyn Repository>,
    model_id: Id,
    provider: &ProviderInfo,
    elapsed_secs: f64,
) {
    let update = LinkMetricsUpdate {
        response_time_secs: elapsed_secs,
        success: false,
        tokens: 0,
        cost: 0.0,
    };
    if let Err(e) = repo.update_link_metrics(model_id, provider.provider_id, update).await {
        warn!(provider = %provider.name, error = %e, "failed to record failure metrics");
    }
    if let Err(e) = repo.increment_api_key_usage(provider.api_key_id).await {
        warn!(provider = %provider.name, error = %e, "failed to record api key usage");
    }
}

async fn record_success(
    repo: &Arc<dyn Repository>,
    model_id: Id,
    provider: &ProviderInfo,
    elapsed_secs: f64,
    tokens: u64,
    cost: f64,
) {
    let update = LinkMetricsUpdate {
        response_time_secs: elapsed_secs,
        success: true,
        tokens,
        cost,
    };
    if let Err(e) = repo.update_link_metrics(model_id, provider.provider_id, update).await {
        warn!(provider = %provider.name, error = %e, "failed to record success metrics");
    }
    if let Err(e) = repo.increment_api_key_usage(provider.api_key_id).await {
        warn!(provider = %provider.name, error = %e, "failed to record api key usage");
    }
}

/// Executes a chat completion against the ordered candidate list, retrying
/// the next candidate on Adapter failure until one succeeds or the list is
/// exhausted (§4.7). `PoolExhausted` behaves like an Adapter failure here —
/// it falls through to the next candidate rather than aborting (§7: "
/// PoolExhausted and Timeout behave identically [to UpstreamFailure]").
pub async fn execute(
    repo: &Arc<dyn Repository>,
    pool: &Arc<AdapterPool>,
    counters: &RoundRobinCounters,
    model_id: Id,
    model_name: &str,
    request: ChatRequest,
    candidates: &[ProviderInfo],
    strategy: Strategy,
    params: &StrategyParams,
) -> Result<ChatResponse, RouterError> {
    let ordered = order_candidates(strategy, candidates, params, model_name, counters)?;
    if ordered.is_empty() {
        return Err(RouterError::AllProvidersUnavailable {
            model: model_name.to_string(),
            tried: 0,
        });
    }

    let mut tried = 0;
    let mut last_error: Option<RouterError> = None;

    for provider in &ordered {
        tried += 1;
        let config = AdapterConfig::new(provider.base_url.clone(), provider.api_key.clone());
        let lease = match pool.acquire(model_name, &provider.name, provider.provider_type, &config).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(provider = %provider.name, error = %e, "pool acquisition failed, trying next candidate");
                last_error = Some(e);
                if strategy == Strategy::SpecifiedProvider {
                    break;
                }
                continue;
            }
        };

        let start = Instant::now();
        match lease.chat_completion(request.clone()).await {
            Ok(response) => {
                let elapsed = start.elapsed().as_secs_f64();
                let tokens = response.usage.map(|u| u.total_tokens as u64).unwrap_or(0);
                record_success(repo, model_id, provider, elapsed, tokens, 0.0).await;
                return Ok(response);
            }
            Err(e) => {
                let elapsed = start.elapsed().as_secs_f64();
                record_failure(repo, model_id, provider, elapsed).await;
                warn!(provider = %provider.name, error = %e, "provider dispatch failed, trying next candidate");
                last_error = Some(RouterError::UpstreamFailure {
                    provider: provider.name.clone(),
                    source: e,
                });
                if strategy == Strategy::SpecifiedProvider {
                    break;
                }
            }
        }
    }

    match last_error {
        Some(err) => Err(err),
        None => Err(RouterError::AllProvidersUnavailable {
            model: model_name.to_string(),
            tried,
        }),
    }
}

/// A provider chosen for a streaming dispatch, paired with the raw stream.
/// The underlying adapter call has already succeeded by the time this is
/// returned; metric recording for the eventual outcome is the caller's job
/// (§10.3 of the facade), since only the HTTP layer knows when the stream
/// actually finished being drained.
pub struct StreamDispatch {
    pub model_id: Id,
    pub provider_id: Id,
    pub provider_name: String,
    pub stream: crate::providers::StreamResult,
}

/// Streaming counterpart of [`execute`]: same ordering and fallthrough
/// semantics, but hands back the open stream on the first candidate whose
/// `stream_chat_completion` call succeeds instead of draining it.
pub async fn execute_stream(
    repo: &Arc<dyn Repository>,
    pool: &Arc<AdapterPool>,
    counters: &RoundRobinCounters,
    model_id: Id,
    model_name: &str,
    request: ChatRequest,
    candidates: &[ProviderInfo],
    strategy: Strategy,
    params: &StrategyParams,
) -> Result<StreamDispatch, RouterError> {
    let ordered = order_candidates(strategy, candidates, params, model_name, counters)?;
    if ordered.is_empty() {
        return Err(RouterError::AllProvidersUnavailable {
            model: model_name.to_string(),
            tried: 0,
        });
    }

    let mut tried = 0;
    let mut last_error: Option<RouterError> = None;

    for provider in &ordered {
        tried += 1;
        let config = AdapterConfig::new(provider.base_url.clone(), provider.api_key.clone());
        let lease = match pool.acquire(model_name, &provider.name, provider.provider_type, &config).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(provider = %provider.name, error = %e, "pool acquisition failed, trying next candidate");
                last_error = Some(e);
                if strategy == Strategy::SpecifiedProvider {
                    break;
                }
                continue;
            }
        };

        match lease.stream_chat_completion(request.clone()).await {
            Ok(stream) => {
                return Ok(StreamDispatch {
                    model_id,
                    provider_id: provider.provider_id,
                    provider_name: provider.name.clone(),
                    stream,
                });
            }
            Err(e) => {
                record_failure(repo, model_id, provider, 0.0).await;
                warn!(provider = %provider.name, error = %e, "stream dispatch failed, trying next candidate");
                last_error = Some(RouterError::UpstreamFailure {
                    provider: provider.name.clone(),
                    source: e,
                });
                if strategy == Strategy::SpecifiedProvider {
                    break;
                }
            }
        }
    }

    match last_error {
        Some(err) => Err(err),
        None => Err(RouterError::AllProvidersUnavailable {
            model: model_name.to_string(),
            tried,
        }),
    }
}

/// Records the final outcome of a drained stream (§4.7 failure/success
/// accounting), once the HTTP layer knows whether it completed cleanly.
pub async fn record_stream_outcome(
    repo: &Arc<dyn Repository>,
    model_id: Id,
    provider_id: Id,
    elapsed_secs: f64,
    success: bool,
    tokens: u64,
) {
    let update = LinkMetricsUpdate {
        response_time_secs: elapsed_secs,
        success,
        tokens,
        cost: 0.0,
    };
    if let Err(e) = repo.update_link_metrics(model_id, provider_id, update).await {
        warn!(provider_id, error = %e, "failed to record stream outcome metrics");
    }
}

/// Joins a `ModelProviderLink`'s live metrics onto a Registry-resolved
/// provider to build the candidate the Strategy Engine scores against.
pub fn provider_info(
    resolved: &crate::domain::ResolvedProvider,
    link: &ModelProviderLink,
    current_connections: usize,
) -> ProviderInfo {
    ProviderInfo {
        provider_id: resolved.provider_id,
        name: resolved.name.clone(),
        provider_type: resolved.provider_type,
        base_url: resolved.base_url.clone(),
        api_key: resolved.api_key.clone(),
        api_key_id: resolved.api_key_id,
        weight: resolved.weight,
        priority: resolved.priority,
        is_preferred: resolved.is_preferred,
        health_status: link.health_status,
        response_time_avg: link.response_time_avg,
        success_rate: link.success_rate,
        cost_per_1k_tokens: link.cost_per_1k_tokens,
        overall_score: link.overall_score,
        current_connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, weight: u32, priority: i32, score: f64) -> ProviderInfo {
        ProviderInfo {
            provider_id: weight as Id,
            name: name.to_string(),
            provider_type: ProviderType::Openai,
            base_url: "https://api.openai.com".to_string(),
            api_key: "sk-test".to_string(),
            api_key_id: weight as Id,
            weight,
            priority,
            is_preferred: false,
            health_status: HealthStatus::Healthy,
            response_time_avg: 1.0,
            success_rate: 0.99,
            cost_per_1k_tokens: 0.01,
            overall_score: score,
            current_connections: 0,
        }
    }

    #[test]
    fn auto_orders_by_overall_score_descending_capped_at_three() {
        let candidates = vec![
            provider("a", 1, 0, 0.5),
            provider("b", 1, 0, 0.9),
            provider("c", 1, 0, 0.7),
            provider("d", 1, 0, 0.2),
        ];
        let counters = RoundRobinCounters::new();
        let ordered =
            order_candidates(Strategy::Auto, &candidates, &StrategyParams::default(), "m", &counters)
                .unwrap();
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered[0].name, "b");
        assert_eq!(ordered[1].name, "c");
        assert_eq!(ordered[2].name, "a");
    }

    #[test]
    fn specified_provider_errors_when_absent() {
        let candidates = vec![provider("a", 1, 0, 0.5)];
        let counters = RoundRobinCounters::new();
        let params = StrategyParams {
            specified_provider: Some("missing".to_string()),
            ..Default::default()
        };
        let err = order_candidates(Strategy::SpecifiedProvider, &candidates, &params, "m", &counters)
            .unwrap_err();
        assert!(matches!(err, RouterError::NotFound { .. }));
    }

    #[test]
    fn unhealthy_candidates_are_excluded() {
        let mut candidates = vec![provider("a", 1, 0, 0.9)];
        candidates[0].health_status = HealthStatus::Unhealthy;
        let counters = RoundRobinCounters::new();
        let ordered =
            order_candidates(Strategy::Auto, &candidates, &StrategyParams::default(), "m", &counters)
                .unwrap();
        assert!(ordered.is_empty());
    }

    #[test]
    fn cost_optimized_falls_back_to_overall_cheapest_when_none_pass() {
        let mut a = provider("a", 1, 0, 0.9);
        a.cost_per_1k_tokens = 5.0;
        let mut b = provider("b", 1, 0, 0.5);
        b.cost_per_1k_tokens = 3.0;
        let candidates = vec![a, b];
        let counters = RoundRobinCounters::new();
        let ordered = order_candidates(
            Strategy::CostOptimized,
            &candidates,
            &StrategyParams::default(),
            "m",
            &counters,
        )
        .unwrap();
        assert_eq!(ordered[0].name, "b");
    }
}
