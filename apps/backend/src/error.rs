//! Maps `RouterError` onto the HTTP surface's JSON error envelope (§6/§7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use routex_common::error::RouterError;

/// Wraps a `RouterError` with the correlation id for the response that
/// produced it, so `IntoResponse` can embed `requestId` in the envelope.
pub struct ApiError {
    pub error: RouterError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: RouterError, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = self.error.detail();
        let status = StatusCode::from_u16(self.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "errorCode": detail.code,
            "message": detail.message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "details": detail.details,
            "requestId": self.request_id,
        });

        (status, Json(body)).into_response()
    }
}
