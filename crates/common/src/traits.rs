//! The upstream adapter contract — every provider module implements this.
//!
//! This is the boundary between the route engine and a specific aggregator's
//! wire protocol. The engine dispatches `quote`/`build_transaction`/
//! `simulate_transaction` to whichever adapters are configured, and never
//! reasons about transport details.

use async_trait::async_trait;

use crate::error::RouterResult;
use crate::types::{
    BuildOptions, BuiltTransaction, NormalizedQuote, QuoteRequest, SimulationResult,
};

/// A single upstream exchange aggregator.
///
/// Implementations are stateless beyond credentials and a reusable
/// connection pool: no mutable per-call state, no retry loop (retry and
/// isolation are the Circuit Breaker's and coalescer's job — an adapter
/// reports the single attempt's outcome and nothing more).
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Stable provider name used in scoring, cache keys, and metrics
    /// (`provider_quote:<name>:...`).
    fn name(&self) -> &str;

    /// Fetch and normalize a quote for the given request.
    async fn quote(&self, request: &QuoteRequest) -> RouterResult<NormalizedQuote>;

    /// Convert a previously obtained quote into a signed-ready transaction
    /// blob for `user_key`, honoring the caller's build options.
    async fn build_transaction(
        &self,
        quote: &NormalizedQuote,
        user_key: &str,
        options: &BuildOptions,
    ) -> RouterResult<BuiltTransaction>;

    /// Dry-run a previously built transaction blob.
    async fn simulate_transaction(
        &self,
        transaction_blob: &str,
        user_key: &str,
    ) -> RouterResult<SimulationResult>;

    /// Lightweight liveness probe, used by health checks and not gated by
    /// the circuit breaker.
    async fn is_healthy(&self) -> bool;
}
