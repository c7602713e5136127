use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::{key_service, log_service, provider_service};
use crate::state::AppState;

// ── User Key endpoints ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    pub provider_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeyRequest {
    /// Rebind the key to a different provider.
    pub provider_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

/// POST /admin/keys — create a new user key
async fn create_key(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".into()));
    }

    let mut redis = state.redis.clone();
    let result = key_service::create_key(&body.name, body.provider_id, &state.db, &mut redis).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /admin/keys — list all keys (without plaintext)
async fn list_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<crate::models::user_key::UserKeyInfo>>, AppError> {
    let keys = key_service::list_keys(&state.db).await?;
    Ok(Json(keys))
}

/// POST /admin/keys/:id/rotate — rotate a key, return new plaintext
async fn rotate_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::user_key::UserKeyCreated>, AppError> {
    let mut redis = state.redis.clone();
    let result = key_service::rotate_key(id, &state.db, &mut redis).await?;
    Ok(Json(result))
}

/// DELETE /admin/keys/:id — soft-delete a key
async fn delete_key_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let mut redis = state.redis.clone();
    key_service::delete_key(id, &state.db, &mut redis).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /admin/keys/:id — rebind provider / toggle active
async fn update_key_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateKeyRequest>,
) -> Result<Json<crate::models::user_key::UserKeyInfo>, AppError> {
    let result = key_service::update_key(id, body.provider_id, body.is_active, &state.db).await?;
    Ok(Json(result))
}

// ── Provider endpoints ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateProviderRequest {
    pub name: String,
    /// "openai" | "anthropic" | "gemini"
    pub kind: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProviderRequest {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub api_key: Option<String>,
    pub is_active: Option<bool>,
}

/// POST /admin/providers
async fn create_provider(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateProviderRequest>,
) -> Result<impl IntoResponse, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".into()));
    }

    let result = provider_service::create_provider(&body.name, &body.kind, &body.api_key, &state.db).await?;

    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /admin/providers
async fn list_providers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<crate::models::provider::ProviderInfo>>, AppError> {
    let providers = provider_service::list_providers(&state.db).await?;
    Ok(Json(providers))
}

/// PUT /admin/providers/:id
async fn update_provider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateProviderRequest>,
) -> Result<Json<crate::models::provider::ProviderInfo>, AppError> {
    let result = provider_service::update_provider(
        id,
        body.name.as_deref(),
        body.kind.as_deref(),
        body.api_key.as_deref(),
        body.is_active,
        &state.db,
    )
    .await?;

    Ok(Json(result))
}

/// DELETE /admin/providers/:id
async fn delete_provider_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    provider_service::delete_provider(id, &state.db).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Request Log endpoints ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub user_id: Option<String>,
    pub provider: Option<String>,
}

/// GET /admin/logs — list tracked requests with pagination + optional filters
async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<crate::models::request_log::LogListResponse>, AppError> {
    let params = log_service::ListLogsParams {
        page: query.page.unwrap_or(1).max(1),
        per_page: query.per_page.unwrap_or(50).min(200).max(1),
        user_id: query.user_id,
        provider: query.provider,
    };
    let result = log_service::list_logs(&state.db, params).await?;
    Ok(Json(result))
}

/// Build the admin router (to be nested under /admin)
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // User keys
        .route("/keys", post(create_key).get(list_keys))
        .route("/keys/{id}", delete(delete_key_handler).put(update_key_handler))
        .route("/keys/{id}/rotate", post(rotate_key))
        // Providers
        .route("/providers", post(create_provider).get(list_providers))
        .route("/providers/{id}", delete(delete_provider_handler).put(update_provider))
        // Logs
        .route("/logs", get(list_logs))
}
