//! Defaults for the route engine's scoring function, timeouts, and cache
//! TTLs. These are the "mutable score normalization constants" the design
//! calls out as configuration — this module holds the defaults that seed
//! `RouterConfig`, not hard-wired values the engine reads directly.

/// Default slippage tolerance when a `QuoteRequest` omits it.
pub const DEFAULT_SLIPPAGE_BPS: u32 = 50;

/// Route expiration window: how long a `QuoteRecord` remains executable.
pub const ROUTE_EXPIRATION_MS: i64 = 30_000;

/// Hard timeout for a single adapter RPC.
pub const ADAPTER_TIMEOUT_MS: u64 = 3_000;

/// Coalesce timeout for a per-provider quote fan-out branch.
pub const PROVIDER_QUOTE_COALESCE_TIMEOUT_MS: u64 = 5_000;

/// Coalesce timeout for the whole-route calculation.
pub const ROUTE_COALESCE_TIMEOUT_MS: u64 = 8_000;

/// Coalesce timeout for the top-level quote cache entry.
pub const QUOTE_COALESCE_TIMEOUT_MS: u64 = 10_000;

/// TTL for a cached per-provider quote.
pub const PROVIDER_QUOTE_CACHE_TTL_MS: u64 = 15_000;

/// How long a swap transaction record stays PENDING before it is eligible
/// for external expiry sweeping.
pub const SWAP_EXPIRATION_MS: i64 = 30_000;

/// Scoring envelope for `outputAmount` normalization (lamports/base units).
pub const SCORE_OUTPUT_AMOUNT_ENVELOPE: f64 = 1e12;

/// Scoring envelope for `gasEstimate` normalization.
pub const SCORE_GAS_ESTIMATE_ENVELOPE: f64 = 200_000.0;

/// Default gas estimate assumed when an adapter does not report one.
pub const DEFAULT_GAS_ESTIMATE: u64 = 100_000;

/// Scoring envelope for `latency` normalization, in milliseconds.
pub const SCORE_LATENCY_ENVELOPE_MS: f64 = 3_000.0;

/// Scoring envelope for the `fees` ratio (fee / inAmount); 1% saturates.
pub const SCORE_FEE_RATIO_ENVELOPE: f64 = 0.01;

/// Default scoring weights; must always sum to 1.0 (validated at startup).
pub const DEFAULT_WEIGHT_OUTPUT: f64 = 0.40;
pub const DEFAULT_WEIGHT_FEE: f64 = 0.25;
pub const DEFAULT_WEIGHT_GAS: f64 = 0.15;
pub const DEFAULT_WEIGHT_LATENCY: f64 = 0.15;
pub const DEFAULT_WEIGHT_RELIABILITY: f64 = 0.05;

/// Default circuit breaker thresholds for adapter operations.
pub const DEFAULT_ADAPTER_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_SERVICE_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
pub const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 30_000;

/// Coalescer single-flight entries older than this are considered leaked
/// and swept regardless of their caller's fate.
pub const COALESCER_STALE_ENTRY_MS: u64 = 10 * 60 * 1000;
