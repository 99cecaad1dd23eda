//! Universal error taxonomy for the router core.
//!
//! Every error carries:
//! - **code**: machine-readable error code (e.g. `ROUTE_EXPIRED`)
//! - **category**: error class (`route`, `input`, `upstream`, `execution`, `infrastructure`)
//! - **recoverable**: whether the caller can retry or fix and retry
//! - **details**: optional structured context (never raw upstream payloads)
//!
//! JSON envelope:
//! ```json
//! {
//!   "errorCode": "ROUTE_EXPIRED",
//!   "message": "Quote quote_abc123 expired at 2026-07-28T10:00:30Z",
//!   "timestamp": "2026-07-28T10:00:31Z",
//!   "details": null,
//!   "requestId": "8f14e45f-ceea-467e-9c4a-..."
//! }
//! ```

use serde::Serialize;
use thiserror::Error;

/// Error category — determines HTTP status mapping at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Route,
    Input,
    Upstream,
    Execution,
    Infrastructure,
}

impl ErrorCategory {
    /// Default HTTP status for errors in this category (overridden per-variant
    /// where the spec calls for something more specific, e.g. 404 vs 410).
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCategory::Route => 404,
            ErrorCategory::Input => 400,
            ErrorCategory::Upstream => 502,
            ErrorCategory::Execution => 422,
            ErrorCategory::Infrastructure => 500,
        }
    }
}

/// Structured error detail for the JSON response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub category: ErrorCategory,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Top-level error type for all router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    // ── Route ────────────────────────────────────────────────────────
    #[error("No route found for this pair")]
    RouteNotFound { causes: Vec<String> },

    #[error("Quote {quote_id} expired at {expires_at}")]
    RouteExpired { quote_id: String, expires_at: String },

    #[error("Route calculation failed: {0}")]
    RouteCalculationFailed(String),

    // ── Input ────────────────────────────────────────────────────────
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Amount too small: {0}")]
    AmountTooSmall(String),

    #[error("Amount too large: {0}")]
    AmountTooLarge(String),

    #[error("Slippage too high: {0} bps")]
    SlippageTooHigh(u32),

    #[error("Token not found: {0}")]
    TokenNotFound(String),

    // ── Upstream ─────────────────────────────────────────────────────
    #[error("Upstream {provider} unavailable: {message}")]
    DexUnavailable { provider: String, message: String },

    #[error("Upstream {provider} rate limited")]
    DexRateLimited { provider: String },

    #[error("Upstream {provider} returned an invalid response: {message}")]
    DexInvalidResponse { provider: String, message: String },

    #[error("Upstream {provider} timed out")]
    TransactionTimeout { provider: String },

    #[error("Circuit breaker open for {service}/{operation}")]
    CircuitBreakerOpen { service: String, operation: String },

    // ── Execution ────────────────────────────────────────────────────
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Slippage exceeded: {0}")]
    SlippageExceeded(String),

    #[error("Insufficient liquidity for this route")]
    InsufficientLiquidity,

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    // ── Infrastructure ───────────────────────────────────────────────
    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),
}

impl RouterError {
    /// Structured detail for the JSON response envelope.
    pub fn detail(&self) -> ErrorDetail {
        let (code, category, recoverable, details) = match self {
            RouterError::RouteNotFound { causes } => (
                "ROUTE_NOT_FOUND",
                ErrorCategory::Route,
                true,
                Some(serde_json::json!({ "causes": causes })),
            ),
            RouterError::RouteExpired { quote_id, expires_at } => (
                "ROUTE_EXPIRED",
                ErrorCategory::Route,
                true,
                Some(serde_json::json!({ "quoteId": quote_id, "expiresAt": expires_at })),
            ),
            RouterError::RouteCalculationFailed(_) => {
                ("ROUTE_CALCULATION_FAILED", ErrorCategory::Route, true, None)
            }
            RouterError::InvalidInput(_) => ("INVALID_INPUT", ErrorCategory::Input, true, None),
            RouterError::InvalidAmount(_) => ("INVALID_AMOUNT", ErrorCategory::Input, true, None),
            RouterError::AmountTooSmall(_) => {
                ("AMOUNT_TOO_SMALL", ErrorCategory::Input, true, None)
            }
            RouterError::AmountTooLarge(_) => {
                ("AMOUNT_TOO_LARGE", ErrorCategory::Input, true, None)
            }
            RouterError::SlippageTooHigh(bps) => (
                "SLIPPAGE_TOO_HIGH",
                ErrorCategory::Input,
                true,
                Some(serde_json::json!({ "slippageBps": bps })),
            ),
            RouterError::TokenNotFound(_) => {
                ("TOKEN_NOT_FOUND", ErrorCategory::Input, true, None)
            }
            RouterError::DexUnavailable { provider, .. } => (
                "DEX_UNAVAILABLE",
                ErrorCategory::Upstream,
                true,
                Some(serde_json::json!({ "provider": provider })),
            ),
            RouterError::DexRateLimited { provider } => (
                "DEX_RATE_LIMITED",
                ErrorCategory::Upstream,
                true,
                Some(serde_json::json!({ "provider": provider })),
            ),
            RouterError::DexInvalidResponse { provider, .. } => (
                "DEX_INVALID_RESPONSE",
                ErrorCategory::Upstream,
                false,
                Some(serde_json::json!({ "provider": provider })),
            ),
            RouterError::TransactionTimeout { provider } => (
                "TRANSACTION_TIMEOUT",
                ErrorCategory::Upstream,
                true,
                Some(serde_json::json!({ "provider": provider })),
            ),
            RouterError::CircuitBreakerOpen { service, operation } => (
                "CIRCUIT_BREAKER_OPEN",
                ErrorCategory::Upstream,
                true,
                Some(serde_json::json!({ "service": service, "operation": operation })),
            ),
            RouterError::TransactionFailed(_) => {
                ("TRANSACTION_FAILED", ErrorCategory::Execution, false, None)
            }
            RouterError::SlippageExceeded(_) => {
                ("SLIPPAGE_EXCEEDED", ErrorCategory::Execution, true, None)
            }
            RouterError::InsufficientLiquidity => (
                "INSUFFICIENT_LIQUIDITY",
                ErrorCategory::Execution,
                true,
                None,
            ),
            RouterError::InsufficientBalance(_) => (
                "INSUFFICIENT_BALANCE",
                ErrorCategory::Execution,
                true,
                None,
            ),
            RouterError::CacheError(_) => {
                ("CACHE_ERROR", ErrorCategory::Infrastructure, true, None)
            }
            RouterError::DatabaseError(_) => {
                ("DATABASE_ERROR", ErrorCategory::Infrastructure, false, None)
            }
            RouterError::ExternalServiceError(_) => (
                "EXTERNAL_SERVICE_ERROR",
                ErrorCategory::Infrastructure,
                true,
                None,
            ),
        };

        ErrorDetail {
            code: code.to_string(),
            message: self.to_string(),
            category,
            recoverable,
            details,
        }
    }

    /// HTTP status code for this error, per spec §6/§7.
    pub fn status_code(&self) -> u16 {
        match self {
            RouterError::RouteNotFound { .. } => 404,
            RouterError::RouteExpired { .. } => 410,
            RouterError::CircuitBreakerOpen { .. } | RouterError::DexRateLimited { .. } => 429,
            RouterError::TransactionTimeout { .. } => 504,
            RouterError::DexUnavailable { .. } | RouterError::DexInvalidResponse { .. } => 502,
            _ => self.detail().category.status_code(),
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
