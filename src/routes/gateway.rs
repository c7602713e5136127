//! The gateway's own proxy surface (spec §4.9): a single catch-all route
//! handing every inbound request straight to `gateway::pipeline::run`.
//! Unlike `/admin`, this surface authenticates inline (C6) rather than
//! through an axum middleware layer, since the auth outcome feeds
//! straight into rate-limit scoping.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, Uri},
    response::Response,
    routing::any,
    Router,
};

use crate::gateway::pipeline::{self, PipelineContext};
use crate::state::AppState;

async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let ctx = PipelineContext {
        registry: state.registry.clone(),
        rate_limiter: state.rate_limiter.clone(),
        key_store: state.key_store.clone(),
        metrics: state.metrics.clone(),
    };

    pipeline::run(ctx, method, uri, headers, body, Some(peer.ip().to_string())).await
}

/// Mounted as the fallback route so it sees every path the admin and
/// health routes don't claim first.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().fallback(any(handle))
}
