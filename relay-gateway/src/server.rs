//! HTTP server setup: application state, background loops, and route wiring.

use crate::auth::auth_middleware;
use crate::config::Config;
use crate::handlers;
use axum::routing::{get, post};
use axum::Router;
use relay_sdk::health::AggregateStatus;
use relay_sdk::repository::Repository;
use relay_sdk::{AdapterPool, HealthChecker, InMemoryRepository, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// The last completed `HealthChecker::check_all` sweep, refreshed on
/// `load_balancing.health_check_interval` by a background loop. `/health`
/// (§4.10) reads this rather than triggering a fresh probe per request.
pub type HealthSnapshot = Arc<RwLock<HashMap<String, AggregateStatus>>>;

/// Shared across every handler. `router` is where request dispatch actually
/// happens (spec §4.8); `repo`/`registry` are held separately because the
/// "unknown model" 400 response (§6) needs to list available models, which
/// isn't a `Router` operation.
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn Repository>,
    pub registry: Arc<Registry>,
    pub pool: Arc<AdapterPool>,
    pub router: Arc<relay_sdk::Router>,
    pub health_checker: Arc<HealthChecker>,
    pub health_snapshot: HealthSnapshot,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            repo: self.repo.clone(),
            registry: self.registry.clone(),
            pool: self.pool.clone(),
            router: self.router.clone(),
            health_checker: self.health_checker.clone(),
            health_snapshot: self.health_snapshot.clone(),
        }
    }
}

/// Background cleanup loop (§4.5): evicts expired/unhealthy pool entries and
/// refills to `min_size` every `cleanup_interval`.
fn spawn_pool_cleanup_loop(pool: Arc<AdapterPool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(relay_sdk::pool::CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            pool.cleanup_once().await;
        }
    });
}

/// Background health loop (§4.5): re-probes stale `AVAILABLE` pool entries
/// every `health_interval`.
fn spawn_pool_health_loop(pool: Arc<AdapterPool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(relay_sdk::pool::HEALTH_INTERVAL);
        loop {
            ticker.tick().await;
            pool.health_sweep_once().await;
        }
    });
}

/// Background Health Checker sweep (§4.6/§4.10): refreshes the cached
/// aggregate status every `health_check_interval` so `/health` is a cheap
/// read instead of a live probe on every request.
fn spawn_health_checker_loop(
    health_checker: Arc<HealthChecker>,
    repo: Arc<dyn Repository>,
    snapshot: HealthSnapshot,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let model_names: Vec<String> = repo
                .get_all_models(true)
                .await
                .into_iter()
                .map(|m| m.name)
                .collect();
            let result = health_checker.check_all(model_names, interval).await;
            *snapshot.write().await = (*result).clone();
        }
    });
}

pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Arc::new(Registry::new(repo.clone()));
    let pool = Arc::new(AdapterPool::new());
    let router_core = Arc::new(relay_sdk::Router::new(repo.clone(), registry.clone(), pool.clone()));
    let health_checker = Arc::new(HealthChecker::new(repo.clone(), registry.clone()));
    let health_snapshot: HealthSnapshot = Arc::new(RwLock::new(HashMap::new()));

    registry.refresh_all().await;
    spawn_pool_cleanup_loop(pool.clone());
    spawn_pool_health_loop(pool.clone());
    spawn_health_checker_loop(
        health_checker.clone(),
        repo.clone(),
        health_snapshot.clone(),
        config.load_balancing.health_check_interval,
    );

    let state = AppState {
        config: Arc::new(config),
        repo,
        registry,
        pool,
        router: router_core,
        health_checker,
        health_snapshot,
    };

    let v1_routes = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/messages", post(handlers::messages))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let app = Router::new()
        .merge(v1_routes)
        .route("/health", get(handlers::health_check))
        .with_state(state);

    Ok(app)
}

/// Per-request deadline for non-streaming calls (§5: "default 30 s
/// non-stream, no deadline streaming").
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(30);
