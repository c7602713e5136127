//! Remote rate-limit backend: the same `RateLimitBackend` contract backed
//! by Redis, reusing the `redis::aio::ConnectionManager` already held in
//! `AppState` rather than inventing a new external system (spec §6's
//! "pluggable... remote shared backend" collaborator).
//!
//! Each window is one Redis key (`INCRBY` + `EXPIRE NX`), which gives
//! atomic check-and-deduct for a single scope/metric/window at the cost of
//! a small, bounded clock-skew window between this process and Redis —
//! acceptable per spec §4.8's "bounded clock skew" contract, since a
//! tumbling window already tolerates sub-second boundary slop.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::gateway::types::{Metric, RateLimitWindow, WindowSize};

use super::{BackendUnreachable, RateLimitBackend};

pub struct RemoteBackend {
    redis: Mutex<ConnectionManager>,
}

impl RemoteBackend {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis: Mutex::new(redis),
        }
    }
}

fn redis_key(scope_key: &str, metric: Metric, window: WindowSize, window_start: i64) -> String {
    format!(
        "gateway:ratelimit:{}:{}:{}:{window_start}",
        scope_key,
        metric.as_str(),
        window.as_str()
    )
}

fn window_boundary(window: WindowSize, now_unix: i64) -> (i64, i64) {
    match window {
        WindowSize::Minute => {
            let start = now_unix - now_unix.rem_euclid(60);
            (start, start + 60)
        }
        WindowSize::Day => {
            let start = now_unix - now_unix.rem_euclid(86_400);
            (start, start + 86_400)
        }
    }
}

#[async_trait::async_trait]
impl RateLimitBackend for RemoteBackend {
    async fn check_and_reserve(
        &self,
        scope_key: &str,
        metric: Metric,
        window: WindowSize,
        limit: i64,
        amount: i64,
        now_unix: i64,
    ) -> Result<RateLimitWindow, BackendUnreachable> {
        let (window_start, window_end) = window_boundary(window, now_unix);
        let key = redis_key(scope_key, metric, window, window_start);
        let ttl = (window_end - now_unix).max(1) as i64;

        let mut conn = self.redis.lock().await;
        let used: i64 = match conn.incr(&key, amount).await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("rate-limit backend unreachable: {e}");
                return Err(BackendUnreachable);
            }
        };
        if used == amount {
            // First write in this window — set expiry once.
            let _: Result<(), _> = conn.expire(&key, ttl).await;
        }

        let allowed = used <= limit;
        if !allowed {
            // Roll back the over-the-limit portion so a denied request
            // doesn't permanently eat into the next caller's budget.
            let _: Result<i64, _> = conn.decr(&key, amount).await;
        }

        Ok(RateLimitWindow {
            metric,
            window,
            scope_key: scope_key.to_string(),
            limit,
            remaining: (limit - used.min(limit)).clamp(0, limit),
            reset_seconds: ttl,
            allowed,
        })
    }

    async fn adjust(
        &self,
        scope_key: &str,
        metric: Metric,
        window: WindowSize,
        delta: i64,
        now_unix: i64,
    ) {
        let (window_start, window_end) = window_boundary(window, now_unix);
        let key = redis_key(scope_key, metric, window, window_start);
        let ttl = (window_end - now_unix).max(1) as i64;

        let mut conn = self.redis.lock().await;
        match conn.incr::<_, _, i64>(&key, delta).await {
            Ok(v) if v < 0 => {
                let _: Result<(), _> = conn.set(&key, 0).await;
            }
            Ok(_) => {
                let _: Result<(), _> = conn.expire(&key, ttl).await;
            }
            Err(e) => {
                tracing::error!("rate-limit backend unreachable during adjust: {e}");
            }
        }
    }
}
