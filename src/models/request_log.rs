use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Full DB row for a tracked gateway request (the persistent `MetricsSink`
/// backing store).
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)]
pub struct RequestLog {
    pub id: Uuid,
    pub request_id: Option<String>,
    pub user_id: String,
    pub client_ip: String,
    pub path: String,
    pub provider: String,
    pub model: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub thought_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub is_streaming: bool,
    pub status_code: i16,
    pub latency_ms: i64,
    pub request_size: i64,
    pub response_size: i64,
    pub created_at: DateTime<Utc>,
}

/// Public info returned by the admin logs listing API.
#[derive(Debug, Serialize)]
pub struct RequestLogInfo {
    pub id: Uuid,
    pub request_id: Option<String>,
    pub user_id: String,
    pub client_ip: String,
    pub path: String,
    pub provider: String,
    pub model: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub thought_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub is_streaming: bool,
    pub status_code: i16,
    pub latency_ms: i64,
    pub request_size: i64,
    pub response_size: i64,
    pub created_at: DateTime<Utc>,
}

impl From<RequestLog> for RequestLogInfo {
    fn from(r: RequestLog) -> Self {
        Self {
            id: r.id,
            request_id: r.request_id,
            user_id: r.user_id,
            client_ip: r.client_ip,
            path: r.path,
            provider: r.provider,
            model: r.model,
            input_tokens: r.input_tokens,
            output_tokens: r.output_tokens,
            thought_tokens: r.thought_tokens,
            total_tokens: r.total_tokens,
            is_streaming: r.is_streaming,
            status_code: r.status_code,
            latency_ms: r.latency_ms,
            request_size: r.request_size,
            response_size: r.response_size,
            created_at: r.created_at,
        }
    }
}

/// Paginated response wrapper for log listing.
#[derive(Debug, Serialize)]
pub struct LogListResponse {
    pub data: Vec<RequestLogInfo>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}
