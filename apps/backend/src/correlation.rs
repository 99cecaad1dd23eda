//! Request correlation id: propagated from `X-Correlation-Id` when present,
//! generated otherwise (§6: "every response carries a `requestId`
//! correlation token").

use axum::http::HeaderMap;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
