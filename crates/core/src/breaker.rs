//! Circuit breaker registry — a per-`(service, operation)` three-state
//! machine gating calls to a dependency.
//!
//! Grounded on `dawsh2-Torq/services/adapters/src/circuit_breaker.rs`
//! (`CircuitBreaker`, `CircuitBreakerConfig`, `should_attempt`/`on_success`/
//! `on_failure`), generalized two ways per `SPEC_FULL.md` §4.2:
//! - keyed per-circuit via a `DashMap` registry instead of one instance
//!   (teacher `DashMap` pattern: `pool_metadata_adapter/src/cache.rs`), and
//! - `nextAttemptTime`-based OPEN→HALF_OPEN transition with strict
//!   single-probe admission in HALF_OPEN, replacing the Torq reference's
//!   unlimited half-open probing.
//!
//! `execute_guarded` is a free-standing method on the registry (the Design
//! Notes' explicit redesign away from a per-adapter decorator type).

use std::future::Future;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use routex_common::clock::Clock;
use routex_common::error::{RouterError, RouterResult};
use routex_common::metrics::{CallOutcome, CircuitTransition, MetricsSink};
use routex_common::types::CircuitState;

/// Per-circuit configuration. The spec calls for different defaults for
/// adapter operations (threshold 3) vs. generic services (threshold 5);
/// callers pick the config that applies when they first touch a circuit.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_ms: i64,
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub fn adapter_default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_ms: 30_000,
            success_threshold: 2,
        }
    }

    pub fn service_default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            success_threshold: 3,
        }
    }

    /// Builds the adapter-operation config from the process-wide settings
    /// loaded into `RouterConfig`, so a deployment's env vars actually
    /// govern breaker behavior instead of only the hardcoded defaults above.
    pub fn from_adapter_settings(cfg: &routex_types::config::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.adapter_failure_threshold,
            recovery_timeout_ms: cfg.recovery_timeout_ms as i64,
            success_threshold: cfg.success_threshold,
        }
    }

    /// Same, for generic service-level circuits (e.g. the swap executor's
    /// provider-build-and-submit path).
    pub fn from_service_settings(cfg: &routex_types::config::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.service_failure_threshold,
            recovery_timeout_ms: cfg.recovery_timeout_ms as i64,
            success_threshold: cfg.success_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Allow,
    AllowAfterHalfOpenTransition,
    ShortCircuit,
}

struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_ms: Option<i64>,
    last_success_ms: Option<i64>,
    next_attempt_ms: Option<i64>,
    /// Set while a HALF_OPEN probe is outstanding; cleared on success or
    /// failure. Prevents more than one concurrent probe.
    probe_in_flight: bool,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_ms: None,
            last_success_ms: None,
            next_attempt_ms: None,
            probe_in_flight: false,
        }
    }

    fn admit(&mut self, now_ms: i64) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allow,
            CircuitState::Open => {
                let reopen_at = self.next_attempt_ms.unwrap_or(i64::MAX);
                if now_ms >= reopen_at {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    self.probe_in_flight = true;
                    Admission::AllowAfterHalfOpenTransition
                } else {
                    Admission::ShortCircuit
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    Admission::ShortCircuit
                } else {
                    self.probe_in_flight = true;
                    Admission::Allow
                }
            }
        }
    }

    fn on_success(&mut self, now_ms: i64, config: CircuitBreakerConfig) -> Option<CircuitTransition> {
        self.last_success_ms = Some(now_ms);
        match self.state {
            CircuitState::Closed => {
                self.failure_count = self.failure_count.saturating_sub(1);
                None
            }
            CircuitState::HalfOpen => {
                self.probe_in_flight = false;
                self.success_count += 1;
                if self.success_count >= config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    Some(CircuitTransition::HalfOpenToClosed)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    fn on_failure(&mut self, now_ms: i64, config: CircuitBreakerConfig) -> Option<CircuitTransition> {
        self.last_failure_ms = Some(now_ms);
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= config.failure_threshold {
                    self.state = CircuitState::Open;
                    self.next_attempt_ms = Some(now_ms + config.recovery_timeout_ms);
                    Some(CircuitTransition::ClosedToOpen)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                self.probe_in_flight = false;
                self.state = CircuitState::Open;
                self.next_attempt_ms = Some(now_ms + config.recovery_timeout_ms);
                self.success_count = 0;
                Some(CircuitTransition::HalfOpenToOpen)
            }
            CircuitState::Open => None,
        }
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.next_attempt_ms = None;
        self.probe_in_flight = false;
    }

    fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_ms: self.last_failure_ms,
            last_success_ms: self.last_success_ms,
            next_attempt_ms: self.next_attempt_ms,
        }
    }
}

/// Read-only view of a circuit's state, for health checks and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_ms: Option<i64>,
    pub last_success_ms: Option<i64>,
    pub next_attempt_ms: Option<i64>,
}

/// Registry of per-`(service, operation)` circuit breakers, shared across
/// the process behind an `Arc`.
pub struct CircuitBreakerRegistry {
    circuits: DashMap<(String, String), Mutex<CircuitInner>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            circuits: DashMap::new(),
            clock,
            metrics,
        }
    }

    fn entry(&self, service: &str, operation: &str) -> dashmap::mapref::one::Ref<'_, (String, String), Mutex<CircuitInner>> {
        let key = (service.to_string(), operation.to_string());
        self.circuits
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(CircuitInner::new()));
        self.circuits.get(&key).expect("just inserted")
    }

    pub fn snapshot(&self, service: &str, operation: &str) -> CircuitSnapshot {
        let entry = self.entry(service, operation);
        entry.lock().expect("circuit mutex poisoned").snapshot()
    }

    /// Manual reset: transitions a circuit back to CLOSED and clears its
    /// counters, regardless of current state.
    pub fn manual_reset(&self, service: &str, operation: &str) {
        let entry = self.entry(service, operation);
        entry.lock().expect("circuit mutex poisoned").reset();
        self.metrics
            .record_circuit_transition(service, operation, CircuitTransition::ManualReset);
    }

    /// Run `thunk` through the circuit for `(service, operation)`. If the
    /// circuit short-circuits, `fallback` is invoked if present; otherwise
    /// `CIRCUIT_BREAKER_OPEN` is returned.
    pub async fn execute_guarded<F, Fut, T, Fb>(
        &self,
        service: &str,
        operation: &str,
        config: CircuitBreakerConfig,
        thunk: F,
        fallback: Option<Fb>,
    ) -> RouterResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RouterResult<T>>,
        Fb: FnOnce() -> RouterResult<T>,
    {
        let now = self.clock.now_ms();
        let admission = {
            let entry = self.entry(service, operation);
            let mut inner = entry.lock().expect("circuit mutex poisoned");
            inner.admit(now)
        };

        if admission == Admission::ShortCircuit {
            self.metrics
                .record_circuit_call(service, operation, CallOutcome::ShortCircuited);
            return match fallback {
                Some(fb) => fb(),
                None => Err(RouterError::CircuitBreakerOpen {
                    service: service.to_string(),
                    operation: operation.to_string(),
                }),
            };
        }

        if admission == Admission::AllowAfterHalfOpenTransition {
            self.metrics
                .record_circuit_transition(service, operation, CircuitTransition::OpenToHalfOpen);
        }

        match thunk().await {
            Ok(value) => {
                let transition = {
                    let entry = self.entry(service, operation);
                    let mut inner = entry.lock().expect("circuit mutex poisoned");
                    inner.on_success(self.clock.now_ms(), config)
                };
                self.metrics
                    .record_circuit_call(service, operation, CallOutcome::Success);
                if let Some(t) = transition {
                    self.metrics.record_circuit_transition(service, operation, t);
                }
                Ok(value)
            }
            Err(err) => {
                let transition = {
                    let entry = self.entry(service, operation);
                    let mut inner = entry.lock().expect("circuit mutex poisoned");
                    inner.on_failure(self.clock.now_ms(), config)
                };
                self.metrics
                    .record_circuit_call(service, operation, CallOutcome::Failure);
                if let Some(t) = transition {
                    self.metrics.record_circuit_transition(service, operation, t);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routex_common::clock::FakeClock;
    use routex_common::metrics::NoopMetrics;

    fn registry(clock: FakeClock) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(Arc::new(clock), Arc::new(NoopMetrics))
    }

    async fn fail() -> RouterResult<()> {
        Err(RouterError::DexUnavailable {
            provider: "orbit".into(),
            message: "boom".into(),
        })
    }

    async fn succeed() -> RouterResult<&'static str> {
        Ok("ok")
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_consecutive_failures() {
        let clock = FakeClock::new(0);
        let reg = registry(clock.clone());
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 30_000,
            success_threshold: 2,
        };

        for _ in 0..3 {
            let _: RouterResult<()> = reg
                .execute_guarded("orbit", "quote", config, fail, None::<fn() -> RouterResult<()>>)
                .await;
        }

        assert_eq!(reg.snapshot("orbit", "quote").state, CircuitState::Open);
    }

    #[tokio::test]
    async fn short_circuits_while_open_and_before_recovery_timeout() {
        let clock = FakeClock::new(0);
        let reg = registry(clock.clone());
        let config = CircuitBreakerConfig::adapter_default();

        for _ in 0..config.failure_threshold {
            let _: RouterResult<()> = reg
                .execute_guarded("orbit", "quote", config, fail, None::<fn() -> RouterResult<()>>)
                .await;
        }
        assert_eq!(reg.snapshot("orbit", "quote").state, CircuitState::Open);

        clock.advance_ms(1_000);
        let result = reg
            .execute_guarded("orbit", "quote", config, succeed, None::<fn() -> RouterResult<&'static str>>)
            .await;
        assert!(matches!(result, Err(RouterError::CircuitBreakerOpen { .. })));
    }

    #[tokio::test]
    async fn transitions_half_open_then_closed_after_success_threshold() {
        let clock = FakeClock::new(0);
        let reg = registry(clock.clone());
        let config = CircuitBreakerConfig::adapter_default();

        for _ in 0..config.failure_threshold {
            let _: RouterResult<()> = reg
                .execute_guarded("orbit", "quote", config, fail, None::<fn() -> RouterResult<()>>)
                .await;
        }
        assert_eq!(reg.snapshot("orbit", "quote").state, CircuitState::Open);

        clock.advance_ms(config.recovery_timeout_ms);
        for _ in 0..config.success_threshold {
            let result = reg
                .execute_guarded("orbit", "quote", config, succeed, None::<fn() -> RouterResult<&'static str>>)
                .await;
            assert!(result.is_ok());
        }

        assert_eq!(reg.snapshot("orbit", "quote").state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_and_rearms_next_attempt() {
        let clock = FakeClock::new(0);
        let reg = registry(clock.clone());
        let config = CircuitBreakerConfig::adapter_default();

        for _ in 0..config.failure_threshold {
            let _: RouterResult<()> = reg
                .execute_guarded("orbit", "quote", config, fail, None::<fn() -> RouterResult<()>>)
                .await;
        }
        clock.advance_ms(config.recovery_timeout_ms);

        let _: RouterResult<()> = reg
            .execute_guarded("orbit", "quote", config, fail, None::<fn() -> RouterResult<()>>)
            .await;

        let snap = reg.snapshot("orbit", "quote");
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.next_attempt_ms, Some(clock.now_ms() + config.recovery_timeout_ms));
    }

    #[tokio::test]
    async fn fallback_is_invoked_when_short_circuited() {
        let clock = FakeClock::new(0);
        let reg = registry(clock.clone());
        let config = CircuitBreakerConfig::adapter_default();

        for _ in 0..config.failure_threshold {
            let _: RouterResult<()> = reg
                .execute_guarded("orbit", "quote", config, fail, None::<fn() -> RouterResult<()>>)
                .await;
        }

        let result = reg
            .execute_guarded("orbit", "quote", config, succeed, Some(|| Ok("fallback")))
            .await;
        assert_eq!(result.unwrap(), "fallback");
    }

    #[tokio::test]
    async fn manual_reset_clears_open_circuit() {
        let clock = FakeClock::new(0);
        let reg = registry(clock.clone());
        let config = CircuitBreakerConfig::adapter_default();

        for _ in 0..config.failure_threshold {
            let _: RouterResult<()> = reg
                .execute_guarded("orbit", "quote", config, fail, None::<fn() -> RouterResult<()>>)
                .await;
        }
        assert_eq!(reg.snapshot("orbit", "quote").state, CircuitState::Open);

        reg.manual_reset("orbit", "quote");
        let snap = reg.snapshot("orbit", "quote");
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }
}
