use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::config::Config;
use crate::gateway::keystore::KeyStore;
use crate::gateway::metrics::MetricsSink;
use crate::gateway::ratelimit::RateLimiter;
use crate::gateway::registry::ProviderRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub config: Config,
    pub registry: Arc<ProviderRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub key_store: Arc<dyn KeyStore>,
    pub metrics: Arc<dyn MetricsSink>,
}
