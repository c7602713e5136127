use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::request_log::{LogListResponse, RequestLog, RequestLogInfo};

/// One tracked request, built from a `MetricsRecord` by the persistent
/// `MetricsSink` (spec §6 — persistence is the collaborator's concern,
/// this is the concrete store the teacher's `log_service` already owned).
pub struct NewRequestLog {
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
}

/// Insert a tracked request into the database.
pub async fn insert_log(db: &PgPool, log: NewRequestLog) -> Result<(), AppError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO request_logs (
            id, request_id, user_id, client_ip, path, provider, model,
            input_tokens, output_tokens, thought_tokens, total_tokens,
            is_streaming, status_code, latency_ms, request_size, response_size,
            created_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17
        )
        "#,
    )
    .bind(id)
    .bind(&log.request_id)
    .bind(&log.user_id)
    .bind(&log.client_ip)
    .bind(&log.path)
    .bind(&log.provider)
    .bind(&log.model)
    .bind(log.input_tokens)
    .bind(log.output_tokens)
    .bind(log.thought_tokens)
    .bind(log.total_tokens)
    .bind(log.is_streaming)
    .bind(log.status_code)
    .bind(log.latency_ms)
    .bind(log.request_size)
    .bind(log.response_size)
    .bind(now)
    .execute(db)
    .await?;

    Ok(())
}

/// Query parameters for listing logs.
pub struct ListLogsParams {
    pub page: i64,
    pub per_page: i64,
    pub user_id: Option<String>,
    pub provider: Option<String>,
}

/// List logs with offset-based pagination and optional filters.
pub async fn list_logs(db: &PgPool, params: ListLogsParams) -> Result<LogListResponse, AppError> {
    let offset = (params.page - 1).max(0) * params.per_page;

    // Data and count queries bind their filters at different placeholder
    // offsets (data query reserves $1/$2 for LIMIT/OFFSET first), so each
    // gets its own WHERE clause built from its own starting index.
    let mut data_conditions: Vec<String> = vec![];
    let mut count_conditions: Vec<String> = vec![];
    let mut data_idx = 3;
    let mut count_idx = 1;
    if params.user_id.is_some() {
        data_conditions.push(format!("user_id = ${data_idx}"));
        count_conditions.push(format!("user_id = ${count_idx}"));
        data_idx += 1;
        count_idx += 1;
    }
    if params.provider.is_some() {
        data_conditions.push(format!("provider = ${data_idx}"));
        count_conditions.push(format!("provider = ${count_idx}"));
    }

    let data_where = if data_conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", data_conditions.join(" AND "))
    };
    let count_where = if count_conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", count_conditions.join(" AND "))
    };

    let count_query = format!("SELECT COUNT(*) FROM request_logs {count_where}");
    let data_query = format!(
        "SELECT * FROM request_logs {data_where} ORDER BY created_at DESC LIMIT $1 OFFSET $2"
    );

    let total: i64 = {
        let mut q = sqlx::query_scalar::<_, i64>(&count_query);
        if let Some(ref u) = params.user_id {
            q = q.bind(u);
        }
        if let Some(ref p) = params.provider {
            q = q.bind(p);
        }
        q.fetch_one(db).await?
    };

    let logs: Vec<RequestLog> = {
        let mut q = sqlx::query_as::<_, RequestLog>(&data_query)
            .bind(params.per_page)
            .bind(offset);
        if let Some(ref u) = params.user_id {
            q = q.bind(u);
        }
        if let Some(ref p) = params.provider {
            q = q.bind(p);
        }
        q.fetch_all(db).await?
    };

    Ok(LogListResponse {
        data: logs.into_iter().map(RequestLogInfo::from).collect(),
        total,
        page: params.page,
        per_page: params.per_page,
    })
}

/// Delete request logs older than `retention_days` days.
/// Returns the number of rows deleted.
pub async fn cleanup_old_logs(db: &PgPool, retention_days: u32) -> Result<u64, AppError> {
    let result = sqlx::query(
        "DELETE FROM request_logs WHERE created_at < NOW() - make_interval(days => $1)",
    )
    .bind(retention_days as i32)
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}
