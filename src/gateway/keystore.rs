//! Key store (collaborator, spec §6): `validate_and_get_actual_key`. The
//! inbound key is passed through unchanged unless it carries the `iw:`
//! indirection prefix, in which case it is looked up and substituted for
//! the real provider key. Wraps the existing Postgres/Redis-backed user
//! key service, which already owns the hashing and caching concerns.

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::gateway::error::GatewayError;
use crate::services::key_service;

pub const INDIRECTION_PREFIX: &str = "iw:";

/// The outcome of resolving an inbound (possibly indirected) API key.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub actual_key: String,
    /// `Some(name)` when the key was indirected and a specific upstream
    /// provider was associated with it at creation time.
    pub provider_name: Option<String>,
}

#[async_trait::async_trait]
pub trait KeyStore: Send + Sync {
    async fn validate_and_get_actual_key(&self, inbound_key: &str) -> Result<ResolvedKey, GatewayError>;
}

pub struct PersistentKeyStore {
    db: PgPool,
    redis: Mutex<ConnectionManager>,
}

impl PersistentKeyStore {
    pub fn new(db: PgPool, redis: ConnectionManager) -> Self {
        Self {
            db,
            redis: Mutex::new(redis),
        }
    }
}

#[async_trait::async_trait]
impl KeyStore for PersistentKeyStore {
    async fn validate_and_get_actual_key(&self, inbound_key: &str) -> Result<ResolvedKey, GatewayError> {
        let Some(opaque) = inbound_key.strip_prefix(INDIRECTION_PREFIX) else {
            return Ok(ResolvedKey {
                actual_key: inbound_key.to_string(),
                provider_name: None,
            });
        };

        let mut redis = self.redis.lock().await;
        let resolved = key_service::validate_and_resolve(opaque, &mut redis, &self.db)
            .await
            .map_err(|e| {
                tracing::error!("key store lookup failed: {e}");
                GatewayError::AuthError("key lookup failed".into())
            })?;

        match resolved {
            Some(r) => Ok(ResolvedKey {
                actual_key: r.actual_key,
                provider_name: Some(r.provider_name),
            }),
            None => Err(GatewayError::AuthError("unknown key".into())),
        }
    }
}
