//! Cache & Coalescer — the `GetWithCoalescing` workhorse.
//!
//! The `Cache` trait (`get`/`set`/`delete`/`has`) is the external
//! key-value collaborator from §1; `RedisCache` backs it with
//! `redis::aio::ConnectionManager`, grounded verbatim on the teacher's
//! `apps/backend/src/clients/cache.rs` (`Cache::new`, `set_ex`, JSON
//! (de)serialization). `InMemoryCache` is a test double with the same
//! contract, used in this crate's own tests and anywhere a Redis instance
//! isn't available.
//!
//! `Coalescer` is the in-process single-flight layer in front of the
//! cache: its in-flight map is a `DashMap<String, InFlight>`, the same
//! concurrent-map pattern the teacher uses for `PoolCache`
//! (`pool_metadata_adapter/src/cache.rs`), generalized from a pool-address
//! key to an arbitrary cache-fingerprint string.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::broadcast;

use routex_common::clock::Clock;
use routex_common::error::{RouterError, RouterResult};
use routex_common::metrics::{CacheEvent, CoalescerReport, MetricsSink};

/// External key-value cache with expiring entries.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Raw JSON string read, or `None` on a miss.
    async fn get(&self, key: &str) -> RouterResult<Option<String>>;
    /// `ttl_ms == 0` is rejected by callers before reaching here (callers
    /// skip caching entirely rather than calling `set` with a zero TTL).
    async fn set(&self, key: &str, value: &str, ttl_ms: u64) -> RouterResult<()>;
    async fn delete(&self, key: &str) -> RouterResult<()>;
    async fn has(&self, key: &str) -> RouterResult<bool>;
}

/// Redis-backed cache. Production default.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> RouterResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RouterError::CacheError(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RouterError::CacheError(format!("redis connect: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> RouterResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| RouterError::CacheError(format!("redis get {key}: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: u64) -> RouterResult<()> {
        let mut conn = self.conn.clone();
        let ttl_secs = (ttl_ms / 1000).max(1);
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(|e| RouterError::CacheError(format!("redis set {key}: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> RouterResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| RouterError::CacheError(format!("redis del {key}: {e}")))?;
        Ok(())
    }

    async fn has(&self, key: &str) -> RouterResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| RouterError::CacheError(format!("redis exists {key}: {e}")))
    }
}

/// In-memory cache with manual expiry checks. Used in unit tests and as a
/// Redis-less fallback (e.g. local development).
#[derive(Default)]
pub struct InMemoryCache {
    entries: StdMutex<HashMap<String, (String, i64)>>,
    clock: Option<Arc<dyn Clock>>,
}

impl InMemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
            clock: Some(clock),
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.as_ref().map(|c| c.now_ms()).unwrap_or(0)
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> RouterResult<Option<String>> {
        let now = self.now_ms();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_ms: u64) -> RouterResult<()> {
        let expires_at = self.now_ms() + ttl_ms as i64;
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> RouterResult<()> {
        self.entries.lock().expect("cache mutex poisoned").remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> RouterResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// A single-flight slot: one factory invocation, broadcast to N waiters.
struct InFlight {
    sender: broadcast::Sender<Result<String, String>>,
    started_at_ms: i64,
    duplicate_requests: Arc<AtomicU64>,
}

/// Single-flight + TTL cache wrapper — `GetWithCoalescing` per §4.3.
pub struct Coalescer {
    cache: Arc<dyn Cache>,
    in_flight: DashMap<String, InFlight>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl Coalescer {
    pub fn new(cache: Arc<dyn Cache>, clock: Arc<dyn Clock>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            cache,
            in_flight: DashMap::new(),
            metrics,
            clock,
        }
    }

    /// Cache-type label is the key's first `:`-delimited segment, used for
    /// per-type hit/miss metrics (`route`, `provider_quote`, `quote`, ...).
    fn cache_type(key: &str) -> &str {
        key.split(':').next().unwrap_or(key)
    }

    /// Removes in-flight single-flight entries older than `max_age`,
    /// detaching any waiters still subscribed (they observe the channel
    /// close and surface `EXTERNAL_SERVICE_ERROR`). Run on an interval from
    /// a background task — see Design Notes §9(b).
    pub fn sweep_stale(&self, max_age: Duration) {
        let now = self.clock.now_ms();
        let cutoff = max_age.as_millis() as i64;
        self.in_flight
            .retain(|_, entry| now - entry.started_at_ms < cutoff);
    }

    /// At-most-one concurrent `factory` invocation per `key` across the
    /// process. Returns `(value, was_cache_hit)`.
    pub async fn get_with_coalescing<T, F, Fut>(
        &self,
        key: &str,
        factory: F,
        coalesce_timeout: Duration,
        ttl: Duration,
    ) -> RouterResult<(T, bool)>
    where
        T: Serialize + DeserializeOwned + Clone + Send + 'static,
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = RouterResult<T>> + Send,
    {
        let cache_type = Self::cache_type(key).to_string();

        // Up to two attempts: the original call, plus one fallback retry
        // if a coalesced wait observed the leader's failure (§4.3 item 4).
        for attempt in 0..2 {
            if let Some(raw) = self.cache.get(key).await? {
                self.metrics.record_cache_event(&cache_type, CacheEvent::Hit);
                let value: T = serde_json::from_str(&raw)
                    .map_err(|e| RouterError::CacheError(format!("deserialize {key}: {e}")))?;
                return Ok((value, true));
            }
            self.metrics.record_cache_event(&cache_type, CacheEvent::Miss);

            enum Role {
                Leader(broadcast::Sender<Result<String, String>>),
                Follower(broadcast::Receiver<Result<String, String>>),
            }

            let role = match self.in_flight.entry(key.to_string()) {
                DashEntry::Occupied(e) => {
                    e.get().duplicate_requests.fetch_add(1, Ordering::SeqCst);
                    Role::Follower(e.get().sender.subscribe())
                }
                DashEntry::Vacant(v) => {
                    let (tx, _rx) = broadcast::channel(64);
                    v.insert(InFlight {
                        sender: tx.clone(),
                        started_at_ms: self.clock.now_ms(),
                        duplicate_requests: Arc::new(AtomicU64::new(0)),
                    });
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Follower(mut rx) => {
                    self.metrics.record_cache_event(&cache_type, CacheEvent::Coalesced);
                    match rx.recv().await {
                        Ok(Ok(raw)) => {
                            let value: T = serde_json::from_str(&raw).map_err(|e| {
                                RouterError::CacheError(format!("deserialize {key}: {e}"))
                            })?;
                            return Ok((value, false));
                        }
                        Ok(Err(_)) if attempt == 0 => continue, // fallback retry, once
                        Ok(Err(message)) => {
                            return Err(RouterError::ExternalServiceError(message));
                        }
                        Err(_) => {
                            return Err(RouterError::ExternalServiceError(format!(
                                "coalesce channel closed for {key}"
                            )));
                        }
                    }
                }
                Role::Leader(tx) => {
                    let outcome: RouterResult<T> =
                        match tokio::time::timeout(coalesce_timeout, factory()).await {
                            Ok(inner) => inner,
                            Err(_elapsed) => Err(RouterError::ExternalServiceError(format!(
                                "coalesce timeout after {}ms for key {key}",
                                coalesce_timeout.as_millis()
                            ))),
                        };

                    let duplicate_requests = self
                        .in_flight
                        .remove(key)
                        .map(|(_, entry)| {
                            let duplicates = entry.duplicate_requests.load(Ordering::SeqCst);
                            self.metrics.record_coalescer_finalize(CoalescerReport {
                                key,
                                original_requests: 1,
                                duplicate_requests: duplicates,
                                requests_saved: duplicates,
                                coalesced_duration_ms: (self.clock.now_ms() - entry.started_at_ms)
                                    .max(0) as u64,
                            });
                            duplicates
                        })
                        .unwrap_or(0);
                    let _ = duplicate_requests;

                    match &outcome {
                        Ok(value) => {
                            let json = serde_json::to_string(value).map_err(|e| {
                                RouterError::CacheError(format!("serialize {key}: {e}"))
                            })?;
                            if !ttl.is_zero() && json != "null" {
                                if let Err(e) = self.cache.set(key, &json, ttl.as_millis() as u64).await {
                                    tracing::warn!(key, error = %e, "cache set failed after coalesced fetch");
                                }
                            }
                            let _ = tx.send(Ok(json));
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e.detail().message));
                        }
                    }

                    return outcome.map(|v| (v, false));
                }
            }
        }

        unreachable!("loop always returns within two attempts")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routex_common::clock::FakeClock;
    use routex_common::metrics::NoopMetrics;
    use std::sync::atomic::AtomicU32;

    fn coalescer() -> (Coalescer, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new(0));
        let cache = Arc::new(InMemoryCache::new(clock.clone() as Arc<dyn Clock>));
        (Coalescer::new(cache, clock.clone() as Arc<dyn Clock>, Arc::new(NoopMetrics)), clock)
    }

    #[tokio::test]
    async fn caches_successful_factory_result() {
        let (c, _clock) = coalescer();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let (v, cached) = c
            .get_with_coalescing(
                "route:SOL:USDC:1000",
                move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, RouterError>(42u64)
                    }
                },
                Duration::from_secs(1),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(v, 42);
        assert!(!cached);

        let (v2, cached2) = c
            .get_with_coalescing(
                "route:SOL:USDC:1000",
                || async { Ok::<_, RouterError>(999u64) },
                Duration::from_secs(1),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(v2, 42, "second call should be a cache hit, not re-invoke factory");
        assert!(cached2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_does_not_cache() {
        let (c, _clock) = coalescer();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            c.get_with_coalescing(
                "route:A:B:1",
                move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, RouterError>(1u64)
                    }
                },
                Duration::from_secs(1),
                Duration::ZERO,
            )
            .await
            .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2, "ttl=0 must never cache");
    }

    #[tokio::test]
    async fn concurrent_callers_invoke_factory_exactly_once() {
        let (c, _clock) = coalescer();
        let c = Arc::new(c);
        let calls = Arc::new(AtomicU32::new(0));
        let (gate_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = c.clone();
            let calls = calls.clone();
            let mut gate_rx = gate_tx.subscribe();
            handles.push(tokio::spawn(async move {
                c.get_with_coalescing(
                    "provider_quote:orbit:SOL:USDC:1000:50",
                    move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            // Yield so all 8 tasks have a chance to join as followers.
                            tokio::task::yield_now().await;
                            Ok::<_, RouterError>(7u64)
                        }
                    },
                    Duration::from_secs(1),
                    Duration::from_secs(30),
                )
                .await
            }));
            let _ = gate_rx.try_recv();
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap().unwrap().0);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| *v == 7));
    }

    #[tokio::test]
    async fn ttl_expiry_on_in_memory_cache() {
        let clock = Arc::new(FakeClock::new(0));
        let cache = InMemoryCache::new(clock.clone() as Arc<dyn Clock>);
        cache.set("k", "\"v\"", 1_000).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("\"v\"".to_string()));
        clock.advance_ms(1_001);
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
