//! Persistent domain entities (§3): `Model`, `Provider`, `ApiKey`,
//! `ModelProviderLink`, `Capability`, and the transient `ResolvedConfig` the
//! Registry builds from them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub type Id = u64;

pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Chat,
    Completion,
    Embedding,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: Id,
    pub name: String,
    pub llm_type: LlmType,
    pub is_enabled: bool,
    pub updated_at: i64,
}

impl Model {
    pub fn touch(&mut self) {
        self.updated_at = now_ts();
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Openai,
    Anthropic,
    Google,
    Volcengine,
    Custom,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Id,
    pub name: String,
    pub provider_type: ProviderType,
    pub official_endpoint: Option<String>,
    pub third_party_endpoint: Option<String>,
    pub is_enabled: bool,
}

impl Provider {
    /// Base URL for the Adapter: `official_endpoint ?? third_party_endpoint`.
    pub fn base_url(&self) -> Option<&str> {
        self.official_endpoint
            .as_deref()
            .or(self.third_party_endpoint.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Id,
    pub provider_id: Id,
    pub name: Option<String>,
    pub secret: String,
    pub weight: u32,
    pub is_preferred: bool,
    pub is_enabled: bool,
    pub daily_quota: Option<u64>,
    pub usage_count: u64,
}

impl ApiKey {
    pub fn is_usable(&self) -> bool {
        self.is_enabled && self.daily_quota.map(|q| self.usage_count < q).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub threshold: u32,
    pub timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            timeout_secs: 60,
        }
    }
}

/// A ModelProviderLink: the association between a Model and a Provider,
/// carrying weight/priority/strategy config and the rolling metrics the
/// Strategy Engine scores against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProviderLink {
    pub model_id: Id,
    pub provider_id: Id,
    pub weight: u32,
    pub priority: i32,
    pub is_preferred: bool,
    pub is_enabled: bool,
    pub strategy: String,
    pub strategy_config: StrategyConfig,
    pub circuit_breaker: CircuitBreakerSettings,

    pub response_time_avg: f64,
    pub response_time_min: f64,
    pub response_time_max: f64,
    pub success_rate: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_cost: f64,
    pub total_tokens_used: u64,
    pub cost_per_1k_tokens: f64,
    pub health_status: HealthStatus,

    pub health_score: f64,
    pub performance_score: f64,
    pub cost_score: f64,
    pub overall_score: f64,

    pub failure_count: u32,
    pub max_failures: u32,
    pub auto_disable_on_failure: bool,
    pub last_failure_time: Option<i64>,
    pub last_health_check: Option<i64>,
}

/// Per-link strategy parameters (`strategy_config`). Optional fields fall
/// back to the documented defaults named throughout §4.7.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub specified_provider: Option<String>,
    pub preferred_provider: Option<String>,
    pub max_cost_threshold: Option<f64>,
}

impl ModelProviderLink {
    pub fn new(model_id: Id, provider_id: Id, weight: u32, priority: i32) -> Self {
        Self {
            model_id,
            provider_id,
            weight,
            priority,
            is_preferred: false,
            is_enabled: true,
            strategy: "auto".to_string(),
            strategy_config: StrategyConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            response_time_avg: 0.0,
            response_time_min: 0.0,
            response_time_max: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_cost: 0.0,
            total_tokens_used: 0,
            cost_per_1k_tokens: 0.0,
            health_status: HealthStatus::Healthy,
            health_score: 1.0,
            performance_score: 1.0,
            cost_score: 1.0,
            overall_score: 1.0,
            failure_count: 0,
            max_failures: 3,
            auto_disable_on_failure: false,
            last_failure_time: None,
            last_health_check: None,
        }
    }

    /// Recompute `{health,performance,cost,overall}_score` from the current
    /// counters (§4.7 "Score recomputation"). Called after every metric update.
    pub fn recompute_scores(&mut self) {
        self.health_score = match self.health_status {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Unhealthy => 0.1,
        };
        self.performance_score =
            0.5 * (1.0 - self.response_time_avg / 10.0).max(0.0) + 0.5 * self.success_rate;
        self.cost_score = (1.0 - self.cost_per_1k_tokens / 0.1).max(0.0);
        self.overall_score =
            0.4 * self.health_score + 0.4 * self.performance_score + 0.2 * self.cost_score;
    }

    /// Exponential moving average with α = 0.1, plus strict min/max tracking.
    fn record_response_time(&mut self, sample_secs: f64) {
        const ALPHA: f64 = 0.1;
        self.response_time_avg = if self.total_requests == 0 {
            sample_secs
        } else {
            ALPHA * sample_secs + (1.0 - ALPHA) * self.response_time_avg
        };
        self.response_time_min = if self.response_time_min == 0.0 {
            sample_secs
        } else {
            self.response_time_min.min(sample_secs)
        };
        self.response_time_max = self.response_time_max.max(sample_secs);
    }

    /// Apply a completed dispatch's outcome (§4.7 failure accounting / §4.1 updateLinkMetrics).
    pub fn record_outcome(
        &mut self,
        response_time_secs: f64,
        success: bool,
        tokens: u64,
        cost: f64,
    ) {
        self.record_response_time(response_time_secs);
        self.total_requests += 1;
        self.total_tokens_used += tokens;
        self.total_cost += cost;
        if self.total_tokens_used > 0 {
            self.cost_per_1k_tokens = self.total_cost / self.total_tokens_used as f64 * 1000.0;
        }

        if success {
            self.successful_requests += 1;
            self.failure_count = 0;
        } else {
            self.failed_requests += 1;
            self.failure_count += 1;
            self.last_failure_time = Some(now_ts());
            if self.auto_disable_on_failure && self.failure_count >= self.max_failures {
                self.is_enabled = false;
                self.health_status = HealthStatus::Unhealthy;
            }
        }
        self.success_rate =
            self.successful_requests as f64 / (self.total_requests.max(1)) as f64;
        self.recompute_scores();
    }

    /// Circuit breaker hook (§4.7): excluded while the breaker is open, i.e.
    /// failures have crossed `threshold` within `timeout` of the last failure.
    pub fn breaker_is_open(&self, now: i64) -> bool {
        if !self.circuit_breaker.enabled {
            return false;
        }
        if self.failure_count < self.circuit_breaker.threshold {
            return false;
        }
        match self.last_failure_time {
            Some(t) => (now - t) < self.circuit_breaker.timeout_secs as i64,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub capability_id: Id,
    pub name: String,
    pub description: Option<String>,
}

/// One usable provider inside a `ResolvedConfig`: Provider + base URL +
/// selected ApiKey + the per-link metrics needed to build a `ProviderInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedProvider {
    pub provider_id: Id,
    pub name: String,
    pub provider_type: ProviderType,
    pub base_url: String,
    pub api_key: String,
    pub api_key_id: Id,
    pub weight: u32,
    pub priority: i32,
    pub is_preferred: bool,
    pub cost_per_1k_tokens: f64,
    pub params: HashMap<String, String>,
}

/// The Registry's denormalized view of a Model and its usable providers
/// (§3, §4.2). Transient; cached keyed by model name with `updated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub model: Model,
    pub providers: Vec<ResolvedProvider>,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> ModelProviderLink {
        ModelProviderLink::new(1, 1, 1, 0)
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let mut l = link();
        l.response_time_avg = 20.0;
        l.success_rate = 0.3;
        l.cost_per_1k_tokens = 5.0;
        l.recompute_scores();
        assert!((0.0..=1.0).contains(&l.overall_score));
        assert!((0.0..=1.0).contains(&l.performance_score));
        assert!((0.0..=1.0).contains(&l.cost_score));
    }

    #[test]
    fn auto_disable_after_max_failures() {
        let mut l = link();
        l.max_failures = 3;
        l.auto_disable_on_failure = true;
        for _ in 0..3 {
            l.record_outcome(0.1, false, 0, 0.0);
        }
        assert!(!l.is_enabled);
        assert_eq!(l.health_status, HealthStatus::Unhealthy);
    }

    #[test]
    fn first_response_time_sample_is_adopted_not_discounted() {
        let mut l = link();
        l.record_outcome(2.0, true, 10, 0.01);
        assert_eq!(l.response_time_avg, 2.0);
    }

    #[test]
    fn success_resets_failure_count_not_totals() {
        let mut l = link();
        l.record_outcome(0.1, false, 10, 0.01);
        assert_eq!(l.failure_count, 1);
        l.record_outcome(0.1, true, 10, 0.01);
        assert_eq!(l.failure_count, 0);
        assert_eq!(l.total_requests, 2);
    }
}
