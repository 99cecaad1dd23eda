//! `GET /quote`, `GET /quote/{id}` (§6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use routex_common::error::RouterError;
use routex_common::types::{QuoteRecord, QuoteRequest, RouteResponse};

use crate::correlation::correlation_id;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/quote", get(get_quote))
        .route("/quote/:id", get(get_quote_record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteQuery {
    input_mint: String,
    output_mint: String,
    amount: String,
    #[serde(default = "default_slippage_bps")]
    slippage_bps: u32,
    user_public_key: Option<String>,
    #[serde(default)]
    favor_low_latency: bool,
    #[serde(default = "default_max_routes")]
    max_routes: u32,
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_max_routes() -> u32 {
    3
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FeeBreakdown {
    platform_fee: u64,
    gas_fee: u64,
    total_fee: u64,
    fee_percentage: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponseDto {
    #[serde(flatten)]
    route: RouteResponse,
    quote_id: String,
    fee_breakdown: FeeBreakdown,
}

async fn get_quote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<QuoteResponseDto>, ApiError> {
    let request_id = correlation_id(&headers);

    let amount: u64 = query.amount.parse().map_err(|_| {
        ApiError::new(
            RouterError::InvalidAmount(format!("amount must be an integer string, got {:?}", query.amount)),
            request_id.clone(),
        )
    })?;

    if query.max_routes > 10 {
        return Err(ApiError::new(
            RouterError::InvalidInput("maxRoutes must be between 0 and 10".to_string()),
            request_id,
        ));
    }

    let request = QuoteRequest {
        input_mint: query.input_mint,
        output_mint: query.output_mint,
        amount,
        slippage_bps: query.slippage_bps,
        user_public_key: query.user_public_key,
        favor_low_latency: query.favor_low_latency,
        max_alternatives: query.max_routes,
    };

    let route = state
        .route_engine
        .find_best_route(request)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    let platform_fee = route.best_route.quote.platform_fee.as_ref().map(|f| f.amount).unwrap_or(0);
    let gas_fee = route.best_route.quote.gas_estimate.unwrap_or(0);
    let total_fee = platform_fee.saturating_add(gas_fee);
    let fee_percentage = if route.best_route.quote.in_amount > 0 {
        (total_fee as f64 / route.best_route.quote.in_amount as f64) * 100.0
    } else {
        0.0
    };

    let quote_id = route.request_id.clone();
    Ok(Json(QuoteResponseDto {
        route,
        quote_id,
        fee_breakdown: FeeBreakdown {
            platform_fee,
            gas_fee,
            total_fee,
            fee_percentage,
        },
    }))
}

async fn get_quote_record(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<QuoteRecord>, ApiError> {
    let request_id = correlation_id(&headers);

    let record = state
        .route_engine
        .get_quote_record(&id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?
        .ok_or_else(|| {
            ApiError::new(
                RouterError::RouteNotFound { causes: vec![format!("no quote record for {id}")] },
                request_id,
            )
        })?;

    Ok(Json(record))
}
