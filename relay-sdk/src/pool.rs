//! Adapter Pool (C5, §4.5): bounded, per-(model, provider) pools of ready
//! Adapters with idle/use-count expiry and background health revalidation.

use crate::domain::{HealthStatus, ProviderType};
use crate::error::RouterError;
use crate::providers::{create_adapter, Adapter, AdapterConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

pub const MIN_SIZE: usize = 2;
pub const MAX_SIZE: usize = 10;
pub const MAX_IDLE: Duration = Duration::from_secs(300);
pub const MAX_USES: u64 = 1000;
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(300);
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Available,
    InUse,
    Unhealthy,
    Expired,
}

struct Entry {
    adapter: Arc<dyn Adapter>,
    status: EntryStatus,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
    last_health_check: Instant,
}

/// One (modelName, providerName) pool: a Mutex-guarded Vec of entries plus a
/// Notify for waiters blocked in `acquire` (§5: "lock NOT held across
/// upstream I/O" — probes and construction happen outside the lock).
struct Pool {
    entries: Mutex<Vec<Entry>>,
    waiters: Notify,
    provider_type: ProviderType,
    config: AdapterConfig,
}

impl Pool {
    fn build_adapter(&self) -> Result<Arc<dyn Adapter>, RouterError> {
        create_adapter(self.provider_type, self.config.clone())
            .map(Arc::from)
            .map_err(|e| RouterError::Internal {
                message: format!("adapter construction failed: {e}"),
            })
    }
}

/// A borrowed Adapter; dropping it returns the pool slot to AVAILABLE.
pub struct Lease {
    pool: Arc<Pool>,
    adapter: Arc<dyn Adapter>,
}

impl std::ops::Deref for Lease {
    type Target = dyn Adapter;
    fn deref(&self) -> &Self::Target {
        self.adapter.as_ref()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let pool = self.pool.clone();
        let target = Arc::as_ptr(&self.adapter);
        tokio::spawn(async move {
            let mut entries = pool.entries.lock().await;
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| Arc::as_ptr(&e.adapter) == target)
            {
                entry.status = EntryStatus::Available;
                entry.last_used_at = Instant::now();
            }
            drop(entries);
            pool.waiters.notify_one();
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey(String, String);

/// Owns every per-(model, provider) pool. One instance is shared across the
/// process; the Router/Strategy Engine hold an `Arc<AdapterPool>`.
pub struct AdapterPool {
    pools: tokio::sync::RwLock<HashMap<PoolKey, Arc<Pool>>>,
}

impl Default for AdapterPool {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterPool {
    pub fn new() -> Self {
        Self {
            pools: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    async fn pool_for(
        &self,
        model: &str,
        provider: &str,
        provider_type: ProviderType,
        config: &AdapterConfig,
    ) -> Arc<Pool> {
        let key = PoolKey(model.to_string(), provider.to_string());
        if let Some(pool) = self.pools.read().await.get(&key) {
            return pool.clone();
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(&key) {
            return pool.clone();
        }

        let pool = Arc::new(Pool {
            entries: Mutex::new(Vec::new()),
            waiters: Notify::new(),
            provider_type,
            config: config.clone(),
        });
        for _ in 0..MIN_SIZE {
            if let Ok(adapter) = pool.build_adapter() {
                let mut entries = pool.entries.lock().await;
                entries.push(Entry {
                    adapter,
                    status: EntryStatus::Available,
                    created_at: Instant::now(),
                    last_used_at: Instant::now(),
                    use_count: 0,
                    last_health_check: Instant::now(),
                });
            } else {
                warn!(model, provider, "eager adapter construction failed");
            }
        }
        pools.insert(key, pool.clone());
        pool
    }

    /// Acquisition algorithm (§4.5).
    pub async fn acquire(
        &self,
        model: &str,
        provider: &str,
        provider_type: ProviderType,
        config: &AdapterConfig,
    ) -> Result<Lease, RouterError> {
        let pool = self.pool_for(model, provider, provider_type, config).await;
        let deadline = Instant::now() + ACQUIRE_TIMEOUT;

        loop {
            {
                let mut entries = pool.entries.lock().await;
                let now = Instant::now();
                for entry in entries.iter_mut() {
                    if entry.status != EntryStatus::Available {
                        continue;
                    }
                    if now.duration_since(entry.last_used_at) > MAX_IDLE {
                        entry.status = EntryStatus::Expired;
                        continue;
                    }
                    if entry.use_count >= MAX_USES {
                        entry.status = EntryStatus::Expired;
                        continue;
                    }
                    entry.status = EntryStatus::InUse;
                    entry.last_used_at = now;
                    entry.use_count += 1;
                    return Ok(Lease {
                        pool: pool.clone(),
                        adapter: entry.adapter.clone(),
                    });
                }

                if entries.len() < MAX_SIZE {
                    match pool.build_adapter() {
                        Ok(adapter) => {
                            entries.push(Entry {
                                adapter: adapter.clone(),
                                status: EntryStatus::InUse,
                                created_at: now,
                                last_used_at: now,
                                use_count: 1,
                                last_health_check: now,
                            });
                            return Ok(Lease {
                                pool: pool.clone(),
                                adapter,
                            });
                        }
                        Err(e) => {
                            warn!(model, provider, error = %e, "adapter construction failed");
                        }
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RouterError::PoolExhausted {
                    model: model.to_string(),
                    provider: provider.to_string(),
                    waited_ms: ACQUIRE_TIMEOUT.as_millis() as u64,
                });
            }
            let _ = tokio::time::timeout(remaining, pool.waiters.notified()).await;
        }
    }

    /// Background cleanup loop (§4.5): drop EXPIRED/UNHEALTHY entries, refill to min_size.
    pub async fn cleanup_once(&self) {
        let pools: Vec<Arc<Pool>> = self.pools.read().await.values().cloned().collect();
        for pool in pools {
            {
                let mut entries = pool.entries.lock().await;
                entries.retain(|e| !matches!(e.status, EntryStatus::Expired | EntryStatus::Unhealthy));
            }
            let deficit = {
                let entries = pool.entries.lock().await;
                MIN_SIZE.saturating_sub(entries.len())
            };
            for _ in 0..deficit {
                if let Ok(adapter) = pool.build_adapter() {
                    let mut entries = pool.entries.lock().await;
                    entries.push(Entry {
                        adapter,
                        status: EntryStatus::Available,
                        created_at: Instant::now(),
                        last_used_at: Instant::now(),
                        use_count: 0,
                        last_health_check: Instant::now(),
                    });
                }
            }
        }
    }

    /// Background health loop (§4.5): re-probe AVAILABLE entries whose last
    /// check is stale. Probes run with the lock released.
    pub async fn health_sweep_once(&self) {
        let pools: Vec<Arc<Pool>> = self.pools.read().await.values().cloned().collect();
        for pool in pools {
            let due: Vec<Arc<dyn Adapter>> = {
                let entries = pool.entries.lock().await;
                entries
                    .iter()
                    .filter(|e| {
                        e.status == EntryStatus::Available
                            && e.last_health_check.elapsed() > HEALTH_INTERVAL
                    })
                    .map(|e| e.adapter.clone())
                    .collect()
            };

            for adapter in due {
                let result = adapter.health_check().await;
                let mut entries = pool.entries.lock().await;
                if let Some(entry) = entries
                    .iter_mut()
                    .find(|e| Arc::ptr_eq(&e.adapter, &adapter))
                {
                    entry.last_health_check = Instant::now();
                    match result {
                        Ok(HealthStatus::Unhealthy) => entry.status = EntryStatus::Unhealthy,
                        Ok(_) if entry.status == EntryStatus::Unhealthy => {
                            entry.status = EntryStatus::Available
                        }
                        Ok(_) => {}
                        Err(_) => {}
                    }
                }
            }
        }
    }

    pub async fn pool_size(&self, model: &str, provider: &str) -> usize {
        let key = PoolKey(model.to_string(), provider.to_string());
        match self.pools.read().await.get(&key) {
            Some(pool) => pool.entries.lock().await.len(),
            None => 0,
        }
    }

    /// In-flight leases for a (model, provider) pair — the `current_connections`
    /// input the Strategy Engine's `least_connections`/`hybrid` strategies read.
    pub async fn in_use_count(&self, model: &str, provider: &str) -> usize {
        let key = PoolKey(model.to_string(), provider.to_string());
        match self.pools.read().await.get(&key) {
            Some(pool) => pool
                .entries
                .lock()
                .await
                .iter()
                .filter(|e| e.status == EntryStatus::InUse)
                .count(),
            None => 0,
        }
    }
}

/// Per-model weighted-round-robin counters (§5: "per-model atomic integers").
#[derive(Default)]
pub struct RoundRobinCounters {
    counters: dashmap::DashMap<String, AtomicU64>,
}

impl RoundRobinCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, model: &str, modulus: u64) -> u64 {
        if modulus == 0 {
            return 0;
        }
        let counter = self
            .counters
            .entry(model.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed) % modulus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_builds_min_size_eagerly() {
        let pool = AdapterPool::new();
        let config = AdapterConfig::new("https://api.openai.com", "sk-test");
        let _lease = pool
            .acquire("gpt-4o", "openai-primary", ProviderType::Openai, &config)
            .await
            .unwrap();
        assert!(pool.pool_size("gpt-4o", "openai-primary").await >= 1);
    }

    #[test]
    fn round_robin_advances_modulo_weight_sum() {
        let counters = RoundRobinCounters::new();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(counters.next("gpt-4o", 3));
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1]);
    }
}
