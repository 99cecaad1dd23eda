//! Domain types shared across the route engine, adapters, and the HTTP surface.
//!
//! Amounts that cross the wire as arbitrary-precision integers are carried as
//! decimal strings (`#[serde(with = "amount_as_string")]`) and held internally
//! as `u64`, matching the request invariant `amount ≤ 2^64-1`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// (De)serializes a `u64` amount as a JSON string, the convention upstream
/// aggregators use for values that can exceed a JS safe integer.
pub mod amount_as_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>().map_err(D::Error::custom)
    }
}

/// Same convention for `Option<u64>` fields.
pub mod opt_amount_as_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| s.parse::<u64>().map_err(D::Error::custom))
            .transpose()
    }
}

/// Swap mode for a normalized quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SwapMode {
    ExactIn,
    ExactOut,
}

/// Inbound routing request, as accepted by `GetQuote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    #[serde(with = "amount_as_string")]
    pub amount: u64,
    pub slippage_bps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_public_key: Option<String>,
    #[serde(default)]
    pub favor_low_latency: bool,
    pub max_alternatives: u32,
}

impl QuoteRequest {
    /// Validates the invariants from the data model: distinct assets, amount
    /// in `[1, u64::MAX]`. `slippage_bps` range is checked separately since it
    /// carries its own error code (`SLIPPAGE_TOO_HIGH` vs `INVALID_AMOUNT`).
    pub fn validate(&self) -> Result<(), crate::error::RouterError> {
        use crate::error::RouterError;

        if self.input_mint == self.output_mint {
            return Err(RouterError::InvalidInput(
                "input and output assets must differ".into(),
            ));
        }
        if self.amount == 0 {
            return Err(RouterError::AmountTooSmall(
                "amount must be at least 1".into(),
            ));
        }
        if self.slippage_bps == 0 || self.slippage_bps > 10_000 {
            return Err(RouterError::SlippageTooHigh(self.slippage_bps));
        }
        Ok(())
    }

    /// Route-level coalescing key: `route:<in>:<out>:<amount>`.
    pub fn route_key(&self) -> String {
        format!("route:{}:{}:{}", self.input_mint, self.output_mint, self.amount)
    }

    /// Top-level quote-result cache key, including slippage.
    pub fn quote_key(&self) -> String {
        format!(
            "quote:{}:{}:{}:{}",
            self.input_mint, self.output_mint, self.amount, self.slippage_bps
        )
    }

    /// Per-provider fan-out key.
    pub fn provider_key(&self, provider: &str) -> String {
        format!(
            "provider_quote:{}:{}:{}:{}:{}",
            provider, self.input_mint, self.output_mint, self.amount, self.slippage_bps
        )
    }
}

/// One pool hop within a route plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStep {
    pub pool: String,
    #[serde(with = "amount_as_string")]
    pub amount_in: u64,
    #[serde(with = "amount_as_string")]
    pub amount_out: u64,
}

/// Platform fee attached to a quote, if the provider charges one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFee {
    #[serde(with = "amount_as_string")]
    pub amount: u64,
    pub fee_bps: u32,
}

/// Adapter-agnostic quote shape every `UpstreamAdapter` normalizes into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedQuote {
    pub input_mint: String,
    pub output_mint: String,
    #[serde(with = "amount_as_string")]
    pub in_amount: u64,
    #[serde(with = "amount_as_string")]
    pub out_amount: u64,
    #[serde(with = "amount_as_string")]
    pub other_amount_threshold: u64,
    pub swap_mode: SwapMode,
    pub slippage_bps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_fee: Option<PlatformFee>,
    pub price_impact_pct: Decimal,
    pub route_plan: Vec<RouteStep>,
    pub time_taken_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_slot: Option<u64>,
    /// Estimated gas/compute units for this route; `None` when the upstream
    /// does not report it (the route engine then assumes the 100000 default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_estimate: Option<u64>,
}

impl NormalizedQuote {
    /// A route plan is malformed when it has no steps, or its hops don't
    /// telescope end-to-end (first hop's `amount_in` must equal the quote's
    /// `in_amount`; each hop's `amount_out` must feed the next hop's
    /// `amount_in`; the last hop's `amount_out` must equal `out_amount`).
    pub fn has_malformed_route_plan(&self) -> bool {
        let Some(first) = self.route_plan.first() else {
            return true;
        };
        if first.amount_in != self.in_amount {
            return true;
        }
        let Some(last) = self.route_plan.last() else {
            return true;
        };
        if last.amount_out != self.out_amount {
            return true;
        }
        self.route_plan
            .windows(2)
            .any(|pair| pair[0].amount_out != pair[1].amount_in)
    }
}

/// Five-dimension multi-criteria score, each sub-score in `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteScore {
    pub output_amount: f64,
    pub fees: f64,
    pub gas_estimate: f64,
    pub latency: f64,
    pub reliability: f64,
    pub total_score: f64,
}

/// A normalized quote plus its provenance and score, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedQuote {
    #[serde(flatten)]
    pub quote: NormalizedQuote,
    pub provider: String,
    pub response_time_ms: u64,
    pub score: RouteScore,
    pub is_cached: bool,
}

/// Response envelope for `FindBestRoute` / `GetQuote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResponse {
    pub best_route: RankedQuote,
    pub alternatives: Vec<RankedQuote>,
    pub request_id: String,
    pub total_response_time_ms: u64,
    pub cache_hit_ratio: f64,
}

/// Persisted record of a successful quote. Immutable after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRecord {
    pub id: String,
    pub provider: String,
    pub input_mint: String,
    pub output_mint: String,
    #[serde(with = "amount_as_string")]
    pub in_amount: u64,
    #[serde(with = "amount_as_string")]
    pub out_amount: u64,
    pub price_impact_pct: Decimal,
    pub slippage_bps: u32,
    /// JSON-encoded `Vec<RouteStep>`.
    pub route_plan_json: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_fee_amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_estimate: Option<u64>,
    pub response_time_ms: u64,
    pub is_cached: bool,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliability_score: Option<f64>,
}

/// Lifecycle status of a swap transaction. Monotone: once terminal, stays put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapStatus::Completed | SwapStatus::Failed | SwapStatus::Expired)
    }
}

/// Persisted swap-transaction lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTransactionRecord {
    pub id: String,
    pub user_id: String,
    pub input_mint: String,
    pub output_mint: String,
    #[serde(with = "amount_as_string")]
    pub in_amount: u64,
    #[serde(with = "amount_as_string")]
    pub out_amount: u64,
    #[serde(with = "amount_as_string")]
    pub min_out_amount: u64,
    pub slippage_bps: u32,
    pub provider: String,
    pub status: SwapStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// JSON-encoded `{quote, buildRequest, transactionBlob}` audit blob.
    pub route_data_json: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_estimate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub expires_at_ms: i64,
}

/// Options forwarded to an adapter's `build_transaction`, mapped
/// adapter-by-adapter into whatever shape the upstream expects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(default)]
    pub wrap_and_unwrap_sol: bool,
    #[serde(default)]
    pub use_shared_accounts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_unit_price_micro_lamports: Option<u64>,
    #[serde(default)]
    pub as_legacy_transaction: bool,
}

/// Result of `BuildTransaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltTransaction {
    pub transaction_blob: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_valid_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_fee: Option<u64>,
}

/// Result of `SimulateTransaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_units: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

/// Circuit breaker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quote(steps: Vec<RouteStep>, in_amount: u64, out_amount: u64) -> NormalizedQuote {
        NormalizedQuote {
            input_mint: "SOL".into(),
            output_mint: "USDC".into(),
            in_amount,
            out_amount,
            other_amount_threshold: out_amount,
            swap_mode: SwapMode::ExactIn,
            slippage_bps: 50,
            platform_fee: None,
            price_impact_pct: Decimal::ZERO,
            route_plan: steps,
            time_taken_ms: 100,
            context_slot: None,
            gas_estimate: None,
        }
    }

    #[test]
    fn empty_route_plan_is_malformed() {
        let q = sample_quote(vec![], 100, 90);
        assert!(q.has_malformed_route_plan());
    }

    #[test]
    fn telescoping_route_plan_is_valid() {
        let q = sample_quote(
            vec![
                RouteStep { pool: "A".into(), amount_in: 100, amount_out: 95 },
                RouteStep { pool: "B".into(), amount_in: 95, amount_out: 90 },
            ],
            100,
            90,
        );
        assert!(!q.has_malformed_route_plan());
    }

    #[test]
    fn non_telescoping_route_plan_is_malformed() {
        let q = sample_quote(
            vec![
                RouteStep { pool: "A".into(), amount_in: 100, amount_out: 95 },
                RouteStep { pool: "B".into(), amount_in: 50, amount_out: 40 },
            ],
            100,
            40,
        );
        assert!(q.has_malformed_route_plan());
    }

    #[test]
    fn request_rejects_identical_assets() {
        let req = QuoteRequest {
            input_mint: "SOL".into(),
            output_mint: "SOL".into(),
            amount: 1,
            slippage_bps: 50,
            user_public_key: None,
            favor_low_latency: false,
            max_alternatives: 3,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn request_rejects_zero_amount() {
        let req = QuoteRequest {
            input_mint: "SOL".into(),
            output_mint: "USDC".into(),
            amount: 0,
            slippage_bps: 50,
            user_public_key: None,
            favor_low_latency: false,
            max_alternatives: 3,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn cache_keys_match_the_documented_convention() {
        let req = QuoteRequest {
            input_mint: "SOL".into(),
            output_mint: "USDC".into(),
            amount: 1_000_000_000,
            slippage_bps: 50,
            user_public_key: None,
            favor_low_latency: false,
            max_alternatives: 3,
        };
        assert_eq!(req.route_key(), "route:SOL:USDC:1000000000");
        assert_eq!(req.quote_key(), "quote:SOL:USDC:1000000000:50");
        assert_eq!(req.provider_key("orbit"), "provider_quote:orbit:SOL:USDC:1000000000:50");
    }

    #[test]
    fn swap_status_terminal_classification() {
        assert!(!SwapStatus::Pending.is_terminal());
        assert!(SwapStatus::Completed.is_terminal());
        assert!(SwapStatus::Failed.is_terminal());
        assert!(SwapStatus::Expired.is_terminal());
    }
}
