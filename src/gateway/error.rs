//! Pipeline error kinds and their HTTP/SSE surface behavior (spec §7).
//! Kept separate from the admin-plane `AppError` since the gateway's
//! error→response mapping is bit-exact per spec (status codes, header
//! sets, body shapes) rather than a generic message wrapper.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::types::RateLimitWindow;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("auth error: {0}")]
    AuthError(String),

    #[error("rate limit exceeded")]
    RateLimitDenied {
        reason: String,
        retry_after_seconds: i64,
        scope_key: String,
        window: RateLimitWindow,
    },

    #[error("upstream connect error: {0}")]
    UpstreamConnectError(String),

    #[error("rate limit backend unreachable")]
    BackendError,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::UnknownProvider(_) => StatusCode::NOT_FOUND.into_response(),
            GatewayError::AuthError(msg) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": format!("Invalid API key: {msg}") })),
            )
                .into_response(),
            GatewayError::RateLimitDenied {
                reason,
                retry_after_seconds,
                scope_key,
                window,
            } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "rate limit exceeded" })),
                )
                    .into_response();
                let headers = response.headers_mut();
                headers.insert(
                    "retry-after",
                    HeaderValue::from_str(&retry_after_seconds.to_string()).unwrap(),
                );
                headers.insert("x-ratelimit-reason", HeaderValue::from_str(&reason).unwrap());
                headers.insert(
                    "x-ratelimit-metric",
                    HeaderValue::from_static(window.metric.as_str()),
                );
                headers.insert(
                    "x-ratelimit-window",
                    HeaderValue::from_static(window.window.as_str()),
                );
                headers.insert(
                    "x-ratelimit-scope",
                    HeaderValue::from_str(&scope_key).unwrap_or(HeaderValue::from_static("unknown")),
                );
                headers.insert(
                    "x-ratelimit-limit",
                    HeaderValue::from_str(&window.limit.to_string()).unwrap(),
                );
                headers.insert(
                    "x-ratelimit-remaining",
                    HeaderValue::from_str(&window.remaining.to_string()).unwrap(),
                );
                response
            }
            GatewayError::UpstreamConnectError(msg) => {
                (StatusCode::BAD_GATEWAY, msg).into_response()
            }
            GatewayError::BackendError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "rate limit error" })),
            )
                .into_response(),
        }
    }
}

/// Best-effort SSE error frame written when the upstream connection drops
/// after streaming response headers have already been sent to the client
/// (spec §7: a status code can no longer be changed at that point).
pub fn sse_error_frame(message: &str) -> Vec<u8> {
    let payload = json!({ "error": message });
    format!("data: {payload}\n\ndata: [DONE]\n\n").into_bytes()
}
