//! Shared application state for the API server.

use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;

use routex_adapter_meridian::MeridianAdapter;
use routex_adapter_orbit::OrbitAdapter;
use routex_common::clock::{Clock, SystemClock};
use routex_common::metrics::{MetricsSink, TracingMetrics};
use routex_common::traits::UpstreamAdapter;
use routex_core::{Cache, CircuitBreakerRegistry, Coalescer, InMemoryCache, RedisCache, RouteEngine, SqliteStore, SwapExecutor};
use routex_types::config::RouterConfig;

/// Backend application state — shared across all request handlers.
pub struct AppState {
    pub config: RouterConfig,
    pub route_engine: RouteEngine,
    pub swap_executor: SwapExecutor,
}

impl AppState {
    pub async fn from_config(config: RouterConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);

        let cache: Arc<dyn Cache> = match RedisCache::connect(&config.cache.redis_url).await {
            Ok(redis) => {
                tracing::info!(redis_url = %config.cache.redis_url, "connected to redis cache");
                Arc::new(redis)
            }
            Err(e) => {
                tracing::warn!(error = %e, "redis unavailable, falling back to in-memory cache");
                Arc::new(InMemoryCache::new(clock.clone()))
            }
        };
        let coalescer = Arc::new(Coalescer::new(cache, clock.clone(), metrics.clone()));
        spawn_coalescer_sweeper(coalescer.clone(), &config);
        let breaker = Arc::new(CircuitBreakerRegistry::new(clock.clone(), metrics.clone()));

        let store = SqliteStore::open("routex.db3")?;
        let store = Arc::new(TokioMutex::new(store));

        let adapters = build_adapters(&config);

        let route_engine = RouteEngine::new(
            adapters.clone(),
            breaker.clone(),
            coalescer,
            store.clone(),
            metrics.clone(),
            clock.clone(),
            config.clone(),
        );
        let swap_executor = SwapExecutor::new(adapters, breaker, store, clock, config.clone());

        Ok(Self {
            config,
            route_engine,
            swap_executor,
        })
    }
}

/// Background sweep of stale single-flight entries (Design Notes §9(b)):
/// a factory that never settles would otherwise leak its in-flight slot
/// forever. Runs for the lifetime of the process.
fn spawn_coalescer_sweeper(coalescer: Arc<Coalescer>, config: &RouterConfig) {
    let interval = std::time::Duration::from_secs(config.cache.coalescer_sweep_interval_secs);
    let max_age = std::time::Duration::from_millis(config.cache.coalescer_stale_entry_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            coalescer.sweep_stale(max_age);
        }
    });
}

fn build_adapters(config: &RouterConfig) -> Vec<Arc<dyn UpstreamAdapter>> {
    let mut adapters: Vec<Arc<dyn UpstreamAdapter>> = Vec::new();

    if config.adapters.orbit.enabled {
        adapters.push(Arc::new(OrbitAdapter::new(
            config.adapters.orbit.base_url.clone(),
            config.engine.adapter_timeout_ms,
        )));
    }

    if config.adapters.meridian.enabled {
        adapters.push(Arc::new(MeridianAdapter::new(
            config.adapters.meridian.base_url.clone(),
            config.adapters.meridian.api_key.clone(),
            config.adapters.meridian.api_secret.clone(),
            config.adapters.meridian.passphrase.clone(),
            config.engine.adapter_timeout_ms,
        )));
    }

    adapters
}
