//! Meridian adapter — HMAC-signed aggregator, modeled on the OKX DEX
//! aggregator's request-signing convention (access key / secret key /
//! passphrase headers, `OK-ACCESS-*` naming). Every request is signed per
//! `crate::signing` before it leaves the process; the upstream rejects
//! anything it cannot reproduce the signature for.
//!
//! HTTP client and error-mapping conventions mirror
//! `routex-adapter-orbit::client` (same §4.1 status-code table); this
//! adapter additionally attaches the four auth headers to every call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use routex_common::error::{RouterError, RouterResult};
use routex_common::traits::UpstreamAdapter;
use routex_common::types::{
    BuildOptions, BuiltTransaction, NormalizedQuote, QuoteRequest, RouteStep, SimulationResult,
    SwapMode,
};

use crate::signing;

const PROVIDER_NAME: &str = "meridian";
const API_PREFIX: &str = "/api/v5/dex/aggregator";

pub struct MeridianAdapter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    passphrase: String,
    timeout: Duration,
}

impl MeridianAdapter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms.saturating_mul(2)))
            .build()
            .expect("failed to build meridian http client");

        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: passphrase.into(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Signs and attaches the four auth headers for a request whose
    /// pre-hash body is `method + pathWithPrefix + bodyOrQuery`.
    fn auth_headers(&self, method: &str, path_with_prefix: &str, body_or_query: &str) -> [(&'static str, String); 4] {
        let timestamp = signing::timestamp_now();
        let prehash = signing::canonical_prehash(&timestamp, method, path_with_prefix, body_or_query);
        let signature = signing::sign(&self.api_secret, &prehash);
        [
            ("OK-ACCESS-KEY", self.api_key.clone()),
            ("OK-ACCESS-SIGN", signature),
            ("OK-ACCESS-TIMESTAMP", timestamp),
            ("OK-ACCESS-PASSPHRASE", self.passphrase.clone()),
        ]
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = RouterResult<T>>) -> RouterResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::TransactionTimeout {
                provider: PROVIDER_NAME.to_string(),
            }),
        }
    }

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
struct MeridianEnvelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<T>,
}

impl<T> MeridianEnvelope<T> {
    fn into_single(self) -> RouterResult<T> {
        if self.code != "0" {
            return Err(RouterError::DexInvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                message: format!("upstream code {}: {}", self.code, self.msg),
            });
        }
        self.data.into_iter().next().ok_or_else(|| RouterError::DexInvalidResponse {
            provider: PROVIDER_NAME.to_string(),
            message: "empty data array".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeridianQuoteData {
    from_token_address: String,
    to_token_address: String,
    from_token_amount: String,
    to_token_amount: String,
    #[serde(default)]
    min_to_token_amount: Option<String>,
    #[serde(default)]
    estimate_gas_fee: Option<String>,
    #[serde(default)]
    price_impact_percentage: Decimal,
    #[serde(default)]
    dex_router_list: Vec<MeridianRouteHop>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeridianRouteHop {
    router: String,
    from_token_amount: String,
    to_token_amount: String,
}

fn parse_u64(raw: &str, field: &str) -> RouterResult<u64> {
    raw.parse().map_err(|_| RouterError::DexInvalidResponse {
        provider: PROVIDER_NAME.to_string(),
        message: format!("malformed {field}: {raw:?}"),
    })
}

impl MeridianQuoteData {
    fn into_normalized(self, slippage_bps: u32) -> RouterResult<NormalizedQuote> {
        let in_amount = parse_u64(&self.from_token_amount, "fromTokenAmount")?;
        let out_amount = parse_u64(&self.to_token_amount, "toTokenAmount")?;
        let other_amount_threshold = match self.min_to_token_amount {
            Some(raw) => parse_u64(&raw, "minToTokenAmount")?,
            None => out_amount.saturating_mul(10_000u64.saturating_sub(slippage_bps as u64)) / 10_000,
        };

        let mut route_plan = Vec::with_capacity(self.dex_router_list.len());
        for hop in self.dex_router_list {
            route_plan.push(RouteStep {
                pool: hop.router,
                amount_in: parse_u64(&hop.from_token_amount, "dexRouterList.fromTokenAmount")?,
                amount_out: parse_u64(&hop.to_token_amount, "dexRouterList.toTokenAmount")?,
            });
        }

        let gas_estimate = self
            .estimate_gas_fee
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok());

        Ok(NormalizedQuote {
            input_mint: self.from_token_address,
            output_mint: self.to_token_address,
            in_amount,
            out_amount,
            other_amount_threshold,
            swap_mode: SwapMode::ExactIn,
            slippage_bps,
            platform_fee: None,
            price_impact_pct: self.price_impact_percentage,
            route_plan,
            time_taken_ms: 0,
            context_slot: None,
            gas_estimate,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeridianBuildBody<'a> {
    from_token_address: &'a str,
    to_token_address: &'a str,
    amount: String,
    slippage: String,
    user_wallet_address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fee_receiver_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_unit_price: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeridianBuildData {
    tx: MeridianBuildTx,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeridianBuildTx {
    data: String,
    #[serde(default)]
    last_valid_height: Option<u64>,
    #[serde(default)]
    priority_fee: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeridianSimulateData {
    success: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    compute_units: Option<u64>,
    #[serde(default)]
    logs: Vec<String>,
}

#[async_trait]
impl UpstreamAdapter for MeridianAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn quote(&self, request: &QuoteRequest) -> RouterResult<NormalizedQuote> {
        let path = format!("{API_PREFIX}/quote");
        let amount = request.amount.to_string();
        let slippage = format!("{:.4}", request.slippage_bps as f64 / 10_000.0);
        let query = signing::canonical_query_string(&[
            ("chainIndex", Some("501")),
            ("fromTokenAddress", Some(request.input_mint.as_str())),
            ("toTokenAddress", Some(request.output_mint.as_str())),
            ("amount", Some(amount.as_str())),
            ("slippage", Some(slippage.as_str())),
        ]);
        let path_with_query = format!("?{query}");
        let headers = self.auth_headers("GET", &format!("{path}{path_with_query}"), "");
        let url = format!("{}{path}?{query}", self.base_url);

        self.with_timeout(async {
            let mut req = self.http.get(&url);
            for (k, v) in &headers {
                req = req.header(*k, v);
            }
            let resp = req.send().await.map_err(|e| RouterError::DexUnavailable {
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
            let envelope: MeridianEnvelope<MeridianQuoteData> = serde_json::from_str(&body).map_err(|e| {
                RouterError::DexInvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!("parse error: {e}"),
                }
            })?;
            envelope.into_single()?.into_normalized(request.slippage_bps)
        })
        .await
    }

    async fn build_transaction(
        &self,
        quote: &NormalizedQuote,
        user_key: &str,
        options: &BuildOptions,
    ) -> RouterResult<BuiltTransaction> {
        let path = format!("{API_PREFIX}/swap");
        let body = MeridianBuildBody {
            from_token_address: &quote.input_mint,
            to_token_address: &quote.output_mint,
            amount: quote.in_amount.to_string(),
            slippage: format!("{:.4}", quote.slippage_bps as f64 / 10_000.0),
            user_wallet_address: user_key,
            fee_receiver_address: options.fee_account.as_deref(),
            compute_unit_price: options.compute_unit_price_micro_lamports,
        };
        let body_json = serde_json::to_string(&body).map_err(|e| RouterError::DexInvalidResponse {
            provider: PROVIDER_NAME.to_string(),
            message: format!("request serialize error: {e}"),
        })?;
        let headers = self.auth_headers("POST", &path, &body_json);
        let url = format!("{}{path}", self.base_url);

        self.with_timeout(async {
            let mut req = self.http.post(&url).body(body_json.clone());
            for (k, v) in &headers {
                req = req.header(*k, v);
            }
            req = req.header("Content-Type", "application/json");
            let resp = req.send().await.map_err(|e| RouterError::DexUnavailable {
                provider: PROVIDER_NAME.to_string(),
                message: e.to_string(),
            })?;

            let resp = self.check_status(resp).await?;
            let text = resp.text().await.map_err(|e| RouterError::DexInvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                message: e.to_string(),
            })?;
            let envelope: MeridianEnvelope<MeridianBuildData> = serde_json::from_str(&text).map_err(|e| {
                RouterError::DexInvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!("parse error: {e}"),
                }
            })?;
            let data = envelope.into_single()?;
            Ok(BuiltTransaction {
                transaction_blob: data.tx.data,
                last_valid_height: data.tx.last_valid_height,
                priority_fee: data.tx.priority_fee,
            })
        })
        .await
    }

    async fn simulate_transaction(
        &self,
        transaction_blob: &str,
        user_key: &str,
    ) -> RouterResult<SimulationResult> {
        let path = format!("{API_PREFIX}/simulate");
        let body_json = serde_json::to_string(&serde_json::json!({
            "tx": transaction_blob,
            "userWalletAddress": user_key,
        }))
        .map_err(|e| RouterError::DexInvalidResponse {
            provider: PROVIDER_NAME.to_string(),
            message: format!("request serialize error: {e}"),
        })?;
        let headers = self.auth_headers("POST", &path, &body_json);
        let url = format!("{}{path}", self.base_url);

        self.with_timeout(async {
            let mut req = self.http.post(&url).body(body_json.clone());
            for (k, v) in &headers {
                req = req.header(*k, v);
            }
            req = req.header("Content-Type", "application/json");
            let resp = req.send().await.map_err(|e| RouterError::DexUnavailable {
                provider: PROVIDER_NAME.to_string(),
                message: e.to_string(),
            })?;

            let resp = self.check_status(resp).await?;
            let text = resp.text().await.map_err(|e| RouterError::DexInvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                message: e.to_string(),
            })?;
            let envelope: MeridianEnvelope<MeridianSimulateData> = serde_json::from_str(&text).map_err(|e| {
                RouterError::DexInvalidResponse {
                    provider: PROVIDER_NAME.to_string(),
                    message: format!("parse error: {e}"),
                }
            })?;
            let data = envelope.into_single()?;
            Ok(SimulationResult {
                success: data.success,
                error: data.error_message,
                compute_units: data.compute_units,
                logs: data.logs,
            })
        })
        .await
    }

    async fn is_healthy(&self) -> bool {
        let path = format!("{API_PREFIX}/supported/chain");
        let headers = self.auth_headers("GET", &path, "");
        let url = format!("{}{path}", self.base_url);
        let mut req = self.http.get(&url);
        for (k, v) in &headers {
            req = req.header(*k, v);
        }
        matches!(req.send().await, Ok(resp) if resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_quote_envelope() {
        let raw = r#"{
            "code": "0",
            "msg": "",
            "data": [{
                "fromTokenAddress": "SOL",
                "toTokenAddress": "USDC",
                "fromTokenAmount": "1000000000",
                "toTokenAmount": "145500000",
                "minToTokenAmount": "144772500",
                "estimateGasFee": "120000",
                "priceImpactPercentage": "0.003",
                "dexRouterList": [
                    {"router": "Raydium", "fromTokenAmount": "1000000000", "toTokenAmount": "145500000"}
                ]
            }]
        }"#;
        let envelope: MeridianEnvelope<MeridianQuoteData> = serde_json::from_str(raw).unwrap();
        let normalized = envelope.into_single().unwrap().into_normalized(50).unwrap();
        assert_eq!(normalized.out_amount, 145_500_000);
        assert_eq!(normalized.route_plan.len(), 1);
        assert_eq!(normalized.gas_estimate, Some(120_000));
    }

    #[test]
    fn nonzero_error_code_surfaces_as_invalid_response() {
        let raw = r#"{"code": "51000", "msg": "parameter error", "data": []}"#;
        let envelope: MeridianEnvelope<MeridianQuoteData> = serde_json::from_str(raw).unwrap();
        let err = envelope.into_single().unwrap_err();
        assert!(matches!(err, RouterError::DexInvalidResponse { .. }));
    }

    #[test]
    fn missing_min_amount_falls_back_to_slippage_derived_threshold() {
        let raw = r#"{
            "code": "0", "msg": "",
            "data": [{
                "fromTokenAddress": "SOL", "toTokenAddress": "USDC",
                "fromTokenAmount": "1000000000", "toTokenAmount": "100000000",
                "priceImpactPercentage": "0", "dexRouterList": []
            }]
        }"#;
        let envelope: MeridianEnvelope<MeridianQuoteData> = serde_json::from_str(raw).unwrap();
        let normalized = envelope.into_single().unwrap().into_normalized(100).unwrap();
        assert_eq!(normalized.other_amount_threshold, 99_000_000);
    }
}
