//! Metrics sink boundary.
//!
//! Every layer below (breaker, coalescer, route engine, adapters) reports
//! outcomes through this trait rather than depending on a concrete metrics
//! backend directly — the sink itself must not depend on anything else in
//! the core (see the design notes on cyclic dependencies). Wire format and
//! exposition (Prometheus, StatsD, ...) are out of scope; this only defines
//! the shape of what gets reported.

/// Outcome of a single guarded call, as seen by the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    ShortCircuited,
}

/// A circuit breaker state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    ClosedToOpen,
    OpenToHalfOpen,
    HalfOpenToClosed,
    HalfOpenToOpen,
    ManualReset,
}

/// Cache read outcome, tagged with the cache-type label (the first `:`
/// segment of the key, e.g. `route`, `provider_quote`, `quote`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Hit,
    Miss,
    Coalesced,
}

/// Per-key coalescer summary, reported once the single-flight entry for
/// that key is finalized (success or failure).
#[derive(Debug, Clone)]
pub struct CoalescerReport<'a> {
    pub key: &'a str,
    pub original_requests: u64,
    pub duplicate_requests: u64,
    pub requests_saved: u64,
    pub coalesced_duration_ms: u64,
}

/// Sink every observable outcome in the router core reports to.
///
/// Implementations must be cheap to call on the hot path (no blocking I/O);
/// a production sink typically batches or fires-and-forgets to an exporter.
pub trait MetricsSink: Send + Sync {
    fn record_circuit_call(&self, service: &str, operation: &str, outcome: CallOutcome);

    fn record_circuit_transition(&self, service: &str, operation: &str, transition: CircuitTransition);

    fn record_cache_event(&self, cache_type: &str, event: CacheEvent);

    fn record_coalescer_finalize(&self, report: CoalescerReport<'_>);

    fn record_adapter_outcome(&self, provider: &str, operation: &str, success: bool, duration_ms: u64);
}

/// Discards everything. Useful in tests and as a default when no sink is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_circuit_call(&self, _service: &str, _operation: &str, _outcome: CallOutcome) {}
    fn record_circuit_transition(&self, _service: &str, _operation: &str, _transition: CircuitTransition) {}
    fn record_cache_event(&self, _cache_type: &str, _event: CacheEvent) {}
    fn record_coalescer_finalize(&self, _report: CoalescerReport<'_>) {}
    fn record_adapter_outcome(&self, _provider: &str, _operation: &str, _success: bool, _duration_ms: u64) {}
}

/// Logs every event as a structured `tracing` record. The default sink for
/// the backend binary until a real exporter is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_circuit_call(&self, service: &str, operation: &str, outcome: CallOutcome) {
        tracing::debug!(service, operation, ?outcome, "circuit call");
    }

    fn record_circuit_transition(&self, service: &str, operation: &str, transition: CircuitTransition) {
        tracing::info!(service, operation, ?transition, "circuit transition");
    }

    fn record_cache_event(&self, cache_type: &str, event: CacheEvent) {
        tracing::debug!(cache_type, ?event, "cache event");
    }

    fn record_coalescer_finalize(&self, report: CoalescerReport<'_>) {
        tracing::debug!(
            key = report.key,
            original_requests = report.original_requests,
            duplicate_requests = report.duplicate_requests,
            requests_saved = report.requests_saved,
            coalesced_duration_ms = report.coalesced_duration_ms,
            "coalescer finalized"
        );
    }

    fn record_adapter_outcome(&self, provider: &str, operation: &str, success: bool, duration_ms: u64) {
        tracing::debug!(provider, operation, success, duration_ms, "adapter outcome");
    }
}
