//! Orbit adapter — unauthenticated REST aggregator, modeled on Jupiter's
//! `/quote` and `/swap` surface (grounded on
//! `polarjack-jupiter-swap-api-client/jupiter-swap-api-client/src/quote.rs`
//! and `.../route_plan_with_metadata.rs` for the wire DTO shape, and on
//! `uniwhales-jup-rust-sdk`'s `SwapRequest`/`SwapResponse` for the build leg).
//! No request signing: the only per-call identity is the caller's public key
//! passed straight through as a query/body field.
//!
//! HTTP client conventions (timeout, `reqwest::Client::builder()`) follow the
//! teacher's `apps/backend/src/clients/alchemy.rs`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use routex_common::error::{RouterError, RouterResult};
use routex_common::traits::UpstreamAdapter;
use routex_common::types::{
    BuildOptions, BuiltTransaction, NormalizedQuote, PlatformFee, QuoteRequest, RouteStep,
    SimulationResult, SwapMode,
};

const PROVIDER_NAME: &str = "orbit";

pub struct OrbitAdapter {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OrbitAdapter {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.saturating_mul(2)))
            .build()
            .expect("failed to build orbit http client");

        Self {
            http,
            base_url: base_url.into(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Runs `fut` under the adapter's own hard timeout (distinct from, and
    /// strictly tighter than, the `reqwest::Client`'s connection-level
    /// timeout) — retry/isolation is the circuit breaker's and coalescer's
    /// job, not the adapter's; this just bounds a single attempt.
    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = RouterResult<T>>,
    ) -> RouterResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::TransactionTimeout {
                provider: PROVIDER_NAME.to_string(),
            }),
        }
    }

    /// Shared HTTP status → typed error mapping (§4.1).
    async fn check_status(&self, resp: Response) -> RouterResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RouterError::DexRateLimited {
                provider: PROVIDER_NAME.to_string(),
            });
        }
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RouterError::DexInvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }
        Err(RouterError::DexUnavailable {
            provider: PROVIDER_NAME.to_string(),
            message: format!("HTTP {status}"),
        })
    }
}

// ── Wire DTOs ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrbitQuoteResponse {
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: String,
    other_amount_threshold: String,
    swap_mode: SwapMode,
    slippage_bps: u32,
    #[serde(default)]
    platform_fee: Option<OrbitPlatformFee>,
    #[serde(default)]
    price_impact_pct: Decimal,
    #[serde(default)]
    route_plan: Vec<OrbitRoutePlanStep>,
    #[serde(default)]
    context_slot: Option<u64>,
    #[serde(default)]
    time_taken: f64,
    #[serde(default)]
    gas_estimate: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrbitPlatformFee {
    amount: String,
    fee_bps: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrbitRoutePlanStep {
    swap_info: OrbitSwapInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrbitSwapInfo {
    #[serde(default, rename = "ammKey")]
    _amm_key: String,
    label: String,
    in_amount: String,
    out_amount: String,
}

fn parse_u64(raw: &str, field: &str) -> RouterResult<u64> {
    raw.parse().map_err(|_| RouterError::DexInvalidResponse {
        provider: PROVIDER_NAME.to_string(),
        message: format!("malformed {field}: {raw:?}"),
    })
}

impl OrbitQuoteResponse {
    fn into_normalized(self) -> RouterResult<NormalizedQuote> {
        let in_amount = parse_u64(&self.in_amount, "inAmount")?;
        let out_amount = parse_u64(&self.out_amount, "outAmount")?;
        let other_amount_threshold = parse_u64(&self.other_amount_threshold, "otherAmountThreshold")?;

        let mut route_plan = Vec::with_capacity(self.route_plan.len());
        for step in self.route_plan {
            route_plan.push(RouteStep {
                pool: step.swap_info.label,
                amount_in: parse_u64(&step.swap_info.in_amount, "routePlan.inAmount")?,
                amount_out: parse_u64(&step.swap_info.out_amount, "routePlan.outAmount")?,
            });
        }

        let platform_fee = self
            .platform_fee
            .map(|f| -> RouterResult<PlatformFee> {
                Ok(PlatformFee {
                    amount: parse_u64(&f.amount, "platformFee.amount")?,
                    fee_bps: f.fee_bps,
                })
            })
            .transpose()?;

        Ok(NormalizedQuote {
            input_mint: self.input_mint,
            output_mint: self.output_mint,
            in_amount,
            out_amount,
            other_amount_threshold,
            swap_mode: self.swap_mode,
            slippage_bps: self.slippage_bps,
            platform_fee,
            price_impact_pct: self.price_impact_pct,
            route_plan,
            time_taken_ms: (self.time_taken * 1000.0).round().max(0.0) as u64,
            context_slot: self.context_slot,
            gas_estimate: self.gas_estimate,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrbitSwapRequest<'a> {
    user_public_key: &'a str,
    quote_response: OrbitQuoteEcho<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wrap_and_unwrap_sol: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_shared_accounts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_account: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_unit_price_micro_lamports: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    as_legacy_transaction: Option<bool>,
}

/// The upstream swap endpoint expects the quote it just issued echoed back
/// verbatim; we only need the fields it actually validates against.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrbitQuoteEcho<'a> {
    input_mint: &'a str,
    output_mint: &'a str,
    in_amount: String,
    out_amount: String,
    other_amount_threshold: String,
    swap_mode: SwapMode,
    slippage_bps: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrbitSwapResponse {
    swap_transaction: String,
    #[serde(default)]
    last_valid_block_height: Option<u64>,
    #[serde(default)]
    prioritization_fee_lamports: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrbitSimulateRequest<'a> {
    transaction: &'a str,
    user_public_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrbitSimulateResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    compute_units_consumed: Option<u64>,
    #[serde(default)]
    logs: Vec<String>,
}

#[async_trait]
impl UpstreamAdapter for OrbitAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn quote(&self, request: &QuoteRequest) -> RouterResult<NormalizedQuote> {
        let url = format!("{}/quote", self.base_url);
        let amount = request.amount.to_string();
        let slippage = request.slippage_bps.to_string();

        self.with_timeout(async {
            let resp = self
                .http
                .get(&url)
                .query(&[
                    ("inputMint", request.input_mint.as_str()),
                    ("outputMint", request.output_mint.as_str()),
                    ("amount", amount.as_str()),
                    ("slippageBps", slippage.as_str()),
                ])
                .send()
                .await
                .map_err(|e| RouterError::DexUnavailable {
                    provider: PROVIDER_NAME.to_string(),
                    message: e.to_string(),
                })?;

            let resp = self.check_status(resp).await?;
            let body = resp.text().await.map_err(|e| RouterError::DexInvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                message: e.to_string(),
            })?;
            if body.trim().is_empty() {
                return Err(RouterError::DexInvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    message: "empty response body".to_string(),
                });
            }
            let parsed: OrbitQuoteResponse = serde_json::from_str(&body).map_err(|e| {
                RouterError::DexInvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!("parse error: {e}"),
                }
            })?;
            parsed.into_normalized()
        })
        .await
    }

    async fn build_transaction(
        &self,
        quote: &NormalizedQuote,
        user_key: &str,
        options: &BuildOptions,
    ) -> RouterResult<BuiltTransaction> {
        let url = format!("{}/swap", self.base_url);
        let body = OrbitSwapRequest {
            user_public_key: user_key,
            quote_response: OrbitQuoteEcho {
                input_mint: &quote.input_mint,
                output_mint: &quote.output_mint,
                in_amount: quote.in_amount.to_string(),
                out_amount: quote.out_amount.to_string(),
                other_amount_threshold: quote.other_amount_threshold.to_string(),
                swap_mode: quote.swap_mode,
                slippage_bps: quote.slippage_bps,
            },
            wrap_and_unwrap_sol: Some(options.wrap_and_unwrap_sol),
            use_shared_accounts: Some(options.use_shared_accounts),
            fee_account: options.fee_account.as_deref(),
            compute_unit_price_micro_lamports: options.compute_unit_price_micro_lamports,
            as_legacy_transaction: Some(options.as_legacy_transaction),
        };

        self.with_timeout(async {
            let resp = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| RouterError::DexUnavailable {
                    provider: PROVIDER_NAME.to_string(),
                    message: e.to_string(),
                })?;

            let resp = self.check_status(resp).await?;
            let parsed: OrbitSwapResponse = resp.json().await.map_err(|e| {
                RouterError::DexInvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!("parse error: {e}"),
                }
            })?;

            Ok(BuiltTransaction {
                transaction_blob: parsed.swap_transaction,
                last_valid_height: parsed.last_valid_block_height,
                priority_fee: parsed.prioritization_fee_lamports,
            })
        })
        .await
    }

    async fn simulate_transaction(
        &self,
        transaction_blob: &str,
        user_key: &str,
    ) -> RouterResult<SimulationResult> {
        let url = format!("{}/swap/simulate", self.base_url);
        let body = OrbitSimulateRequest {
            transaction: transaction_blob,
            user_public_key: user_key,
        };

        self.with_timeout(async {
            let resp = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| RouterError::DexUnavailable {
                    provider: PROVIDER_NAME.to_string(),
                    message: e.to_string(),
                })?;

            let resp = self.check_status(resp).await?;
            let parsed: OrbitSimulateResponse = resp.json().await.map_err(|e| {
                RouterError::DexInvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!("parse error: {e}"),
                }
            })?;

            Ok(SimulationResult {
                success: parsed.success,
                error: parsed.error,
                compute_units: parsed.compute_units_consumed,
                logs: parsed.logs,
            })
        })
        .await
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        matches!(
            self.http.get(&url).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_quote_response() {
        let raw = r#"{
            "inputMint": "SOL",
            "outputMint": "USDC",
            "inAmount": "1000000000",
            "outAmount": "145670000",
            "otherAmountThreshold": "144943650",
            "swapMode": "ExactIn",
            "slippageBps": 50,
            "platformFee": {"amount": "1000", "feeBps": 10},
            "priceImpactPct": "0.002",
            "routePlan": [
                {"swapInfo": {"ammKey": "pool-a", "label": "Orca", "inAmount": "1000000000", "outAmount": "145670000"}}
            ],
            "contextSlot": 123456,
            "timeTaken": 0.25
        }"#;
        let parsed: OrbitQuoteResponse = serde_json::from_str(raw).unwrap();
        let normalized = parsed.into_normalized().unwrap();
        assert_eq!(normalized.out_amount, 145_670_000);
        assert_eq!(normalized.route_plan.len(), 1);
        assert_eq!(normalized.route_plan[0].pool, "Orca");
        assert_eq!(normalized.time_taken_ms, 250);
    }

    #[test]
    fn malformed_amount_field_is_invalid_response() {
        let raw = r#"{
            "inputMint": "SOL", "outputMint": "USDC",
            "inAmount": "not-a-number", "outAmount": "1",
            "otherAmountThreshold": "1", "swapMode": "ExactIn", "slippageBps": 50,
            "priceImpactPct": "0", "routePlan": [], "timeTaken": 0
        }"#;
        let parsed: OrbitQuoteResponse = serde_json::from_str(raw).unwrap();
        let err = parsed.into_normalized().unwrap_err();
        assert!(matches!(err, RouterError::DexInvalidResponse { .. }));
    }
}
