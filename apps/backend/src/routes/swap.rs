//! `POST /swap/execute`, `POST /swap/simulate`, `GET /swap/{id}`,
//! `POST /swap/{id}/cancel` (§6).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use routex_common::types::{BuildOptions, SwapStatus, SwapTransactionRecord};

use crate::correlation::correlation_id;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/swap/execute", post(execute_swap))
        .route("/swap/simulate", post(simulate_swap))
        .route("/swap/:transactionId", get(get_swap_status))
        .route("/swap/:transactionId/cancel", post(cancel_swap))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteSwapRequest {
    quote_id: String,
    user_public_key: String,
    #[serde(default)]
    wrap_and_unwrap_sol: bool,
    #[serde(default)]
    use_shared_accounts: bool,
    fee_account: Option<String>,
    compute_unit_price_micro_lamports: Option<u64>,
    #[serde(default)]
    as_legacy_transaction: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulateSwapRequest {
    quote_id: String,
    user_public_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionDto {
    swap_transaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_valid_block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prioritization_fee_lamports: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteSwapResponse {
    transaction_id: String,
    status: SwapStatus,
    transaction: TransactionDto,
    processing_time: u64,
    expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationDto {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_units_consumed: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    logs: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateSwapResponse {
    transaction_id: String,
    status: SwapStatus,
    simulation: SimulationDto,
    processing_time: u64,
}

async fn execute_swap(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ExecuteSwapRequest>,
) -> Result<Json<ExecuteSwapResponse>, ApiError> {
    let request_id = correlation_id(&headers);

    let options = BuildOptions {
        wrap_and_unwrap_sol: body.wrap_and_unwrap_sol,
        use_shared_accounts: body.use_shared_accounts,
        fee_account: body.fee_account,
        compute_unit_price_micro_lamports: body.compute_unit_price_micro_lamports,
        as_legacy_transaction: body.as_legacy_transaction,
    };

    let result = state
        .swap_executor
        .execute_swap(&body.quote_id, &body.user_public_key, options)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;

    Ok(Json(ExecuteSwapResponse {
        transaction_id: result.transaction_id,
        status: result.status,
        transaction: TransactionDto {
            swap_transaction: result.transaction.transaction_blob,
            last_valid_block_height: result.transaction.last_valid_height,
            prioritization_fee_lamports: result.transaction.priority_fee,
        },
        processing_time: result.processing_time_ms,
        expires_at: result.expires_at_ms,
    }))
}

async fn simulate_swap(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SimulateSwapRequest>,
) -> Result<Json<SimulateSwapResponse>, ApiError> {
    let request_id = correlation_id(&headers);

    let result = state
        .swap_executor
        .simulate_swap(&body.quote_id, &body.user_public_key)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;

    Ok(Json(SimulateSwapResponse {
        transaction_id: result.transaction_id,
        status: result.status,
        simulation: SimulationDto {
            success: result.simulation.success,
            error: result.simulation.error,
            compute_units_consumed: result.simulation.compute_units,
            logs: result.simulation.logs,
        },
        processing_time: result.processing_time_ms,
    }))
}

async fn get_swap_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(transaction_id): Path<String>,
) -> Result<Json<SwapTransactionRecord>, ApiError> {
    let request_id = correlation_id(&headers);

    let record = state
        .swap_executor
        .get_swap_status(&transaction_id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?
        .ok_or_else(|| {
            ApiError::new(
                routex_common::error::RouterError::RouteNotFound {
                    causes: vec![format!("no swap transaction for {transaction_id}")],
                },
                request_id,
            )
        })?;

    Ok(Json(record))
}

async fn cancel_swap(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(transaction_id): Path<String>,
) -> Result<Json<SwapTransactionRecord>, ApiError> {
    let request_id = correlation_id(&headers);

    let record = state
        .swap_executor
        .cancel_swap(&transaction_id)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;

    Ok(Json(record))
}
