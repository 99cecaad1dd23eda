//! Layered configuration for the router service.
//!
//! Mirrors the teacher's `AppConfig` (general/trading/risk/network nested
//! structs) but scoped to what the route engine, circuit breakers,
//! coalescer, and adapters actually need to be configured at startup.
//! Loaded from environment via `dotenvy` in `apps/backend`, with every
//! field falling back to a documented default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Top-level router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub general: GeneralConfig,
    pub engine: EngineConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub adapters: AdaptersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Bind address for the HTTP surface, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    pub verbose: bool,
}

/// Route engine: scoring weights, normalization envelopes, and the
/// reliability table. Weights must sum to 1.0 — validated at startup by
/// `ScoringWeights::validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub route_expiration_ms: i64,
    pub default_slippage_bps: u32,
    pub max_alternatives_default: u32,
    pub weights: ScoringWeights,
    /// Normalization envelopes for the five scoring dimensions.
    pub normalization: ScoreNormalization,
    /// Provider name → static reliability score in `[0, 1]`. Authoritative:
    /// always consulted, never shadowed by a hard-coded constant.
    pub reliability: HashMap<String, f64>,
    /// Reliability assumed for a provider absent from the table above.
    pub default_reliability: f64,
    pub route_coalesce_timeout_ms: u64,
    pub provider_quote_coalesce_timeout_ms: u64,
    pub quote_coalesce_timeout_ms: u64,
    pub provider_quote_cache_ttl_ms: u64,
    pub swap_expiration_ms: i64,
    pub adapter_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub output_amount: f64,
    pub fees: f64,
    pub gas_estimate: f64,
    pub latency: f64,
    pub reliability: f64,
}

impl ScoringWeights {
    /// The spec requires the weight vector to sum to 1.0; tolerate floating
    /// point slop up to 1e-6.
    pub fn validate(&self) -> Result<(), String> {
        let sum = self.output_amount + self.fees + self.gas_estimate + self.latency + self.reliability;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("scoring weights must sum to 1.0, got {sum}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreNormalization {
    pub output_amount_envelope: f64,
    pub gas_estimate_envelope: f64,
    pub latency_envelope_ms: f64,
    pub fee_ratio_envelope: f64,
    pub default_gas_estimate: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub adapter_failure_threshold: u32,
    pub service_failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// `redis://` connection string for the distributed cache.
    pub redis_url: String,
    pub coalescer_stale_entry_ms: u64,
    pub coalescer_sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptersConfig {
    pub orbit: OrbitAdapterConfig,
    pub meridian: MeridianAdapterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbitAdapterConfig {
    pub base_url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeridianAdapterConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    pub enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut reliability = HashMap::new();
        reliability.insert("orbit".to_string(), 0.95);
        reliability.insert("meridian".to_string(), 0.90);

        Self {
            general: GeneralConfig {
                bind_addr: "0.0.0.0:8080".to_string(),
                verbose: false,
            },
            engine: EngineConfig {
                route_expiration_ms: routex_common::constants::ROUTE_EXPIRATION_MS,
                default_slippage_bps: routex_common::constants::DEFAULT_SLIPPAGE_BPS,
                max_alternatives_default: 3,
                weights: ScoringWeights {
                    output_amount: routex_common::constants::DEFAULT_WEIGHT_OUTPUT,
                    fees: routex_common::constants::DEFAULT_WEIGHT_FEE,
                    gas_estimate: routex_common::constants::DEFAULT_WEIGHT_GAS,
                    latency: routex_common::constants::DEFAULT_WEIGHT_LATENCY,
                    reliability: routex_common::constants::DEFAULT_WEIGHT_RELIABILITY,
                },
                normalization: ScoreNormalization {
                    output_amount_envelope: routex_common::constants::SCORE_OUTPUT_AMOUNT_ENVELOPE,
                    gas_estimate_envelope: routex_common::constants::SCORE_GAS_ESTIMATE_ENVELOPE,
                    latency_envelope_ms: routex_common::constants::SCORE_LATENCY_ENVELOPE_MS,
                    fee_ratio_envelope: routex_common::constants::SCORE_FEE_RATIO_ENVELOPE,
                    default_gas_estimate: routex_common::constants::DEFAULT_GAS_ESTIMATE,
                },
                reliability,
                default_reliability: 0.80,
                route_coalesce_timeout_ms: routex_common::constants::ROUTE_COALESCE_TIMEOUT_MS,
                provider_quote_coalesce_timeout_ms:
                    routex_common::constants::PROVIDER_QUOTE_COALESCE_TIMEOUT_MS,
                quote_coalesce_timeout_ms: routex_common::constants::QUOTE_COALESCE_TIMEOUT_MS,
                provider_quote_cache_ttl_ms: routex_common::constants::PROVIDER_QUOTE_CACHE_TTL_MS,
                swap_expiration_ms: routex_common::constants::SWAP_EXPIRATION_MS,
                adapter_timeout_ms: routex_common::constants::ADAPTER_TIMEOUT_MS,
            },
            circuit_breaker: CircuitBreakerConfig {
                adapter_failure_threshold: routex_common::constants::DEFAULT_ADAPTER_FAILURE_THRESHOLD,
                service_failure_threshold: routex_common::constants::DEFAULT_SERVICE_FAILURE_THRESHOLD,
                success_threshold: routex_common::constants::DEFAULT_SUCCESS_THRESHOLD,
                recovery_timeout_ms: routex_common::constants::DEFAULT_RECOVERY_TIMEOUT_MS,
            },
            cache: CacheConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                coalescer_stale_entry_ms: routex_common::constants::COALESCER_STALE_ENTRY_MS,
                coalescer_sweep_interval_secs: 60,
            },
            adapters: AdaptersConfig {
                orbit: OrbitAdapterConfig {
                    base_url: "https://api.0x.org".to_string(),
                    enabled: true,
                },
                meridian: MeridianAdapterConfig {
                    base_url: "https://www.okx.com".to_string(),
                    api_key: String::new(),
                    api_secret: String::new(),
                    passphrase: String::new(),
                    enabled: false,
                },
            },
        }
    }
}

impl RouterConfig {
    /// Loads configuration from environment variables (via `dotenvy`),
    /// falling back to `Default` for anything unset. Validates the weight
    /// vector sums to 1.0.
    pub fn from_env() -> Result<Self, String> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ROUTEX_BIND_ADDR") {
            cfg.general.bind_addr = v;
        }
        if let Ok(v) = std::env::var("ROUTEX_REDIS_URL") {
            cfg.cache.redis_url = v;
        }
        if let Ok(v) = std::env::var("ROUTEX_ORBIT_BASE_URL") {
            cfg.adapters.orbit.base_url = v;
        }
        if let Ok(v) = std::env::var("ROUTEX_MERIDIAN_BASE_URL") {
            cfg.adapters.meridian.base_url = v;
        }
        if let Ok(v) = std::env::var("ROUTEX_MERIDIAN_API_KEY") {
            cfg.adapters.meridian.api_key = v;
        }
        if let Ok(v) = std::env::var("ROUTEX_MERIDIAN_API_SECRET") {
            cfg.adapters.meridian.api_secret = v;
        }
        if let Ok(v) = std::env::var("ROUTEX_MERIDIAN_PASSPHRASE") {
            cfg.adapters.meridian.passphrase = v;
        }
        cfg.adapters.meridian.enabled = !cfg.adapters.meridian.api_key.is_empty();

        cfg.engine
            .weights
            .validate()
            .map_err(|e| format!("invalid configuration: {e}"))?;

        Ok(cfg)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        RouterConfig::default().engine.weights.validate().unwrap();
    }

    #[test]
    fn bad_weights_are_rejected() {
        let mut cfg = RouterConfig::default();
        cfg.engine.weights.fees = 0.9;
        assert!(cfg.engine.weights.validate().is_err());
    }

    #[test]
    fn json_round_trip_preserves_reliability_table() {
        let cfg = RouterConfig::default();
        let json = cfg.to_json_string().unwrap();
        let restored = RouterConfig::from_json_str(&json).unwrap();
        assert_eq!(restored.engine.reliability.get("orbit"), Some(&0.95));
    }

    #[test]
    fn default_reliability_used_for_unknown_provider() {
        let cfg = RouterConfig::default();
        let score = cfg
            .engine
            .reliability
            .get("unknown-provider")
            .copied()
            .unwrap_or(cfg.engine.default_reliability);
        assert_eq!(score, cfg.engine.default_reliability);
    }
}
