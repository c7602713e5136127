//! Rate-Limit Engine (C8): token-bucket reservations across composite
//! scopes, with post-hoc reconciliation. Two pluggable backends share one
//! trait contract — the same atomic check-and-deduct semantics, modulo the
//! remote backend's bounded clock skew (spec §4.8, §6).

pub mod memory;
pub mod remote;

use std::collections::HashMap;

use crate::gateway::types::{Metric, RateLimitWindow, ReserveOutcome, ScopeKeys, WindowSize};

/// Per-scope-dimension configured limits. A `None` field means that
/// dimension is unlimited for that metric/window — the window is simply
/// never checked, rather than checked against an implicit cap.
#[derive(Debug, Clone, Default)]
pub struct ScopeLimits {
    pub requests_per_minute: Option<i64>,
    pub requests_per_day: Option<i64>,
    pub tokens_per_minute: Option<i64>,
    pub tokens_per_day: Option<i64>,
}

impl ScopeLimits {
    pub fn limit_for(&self, metric: Metric, window: WindowSize) -> Option<i64> {
        match (metric, window) {
            (Metric::Requests, WindowSize::Minute) => self.requests_per_minute,
            (Metric::Requests, WindowSize::Day) => self.requests_per_day,
            (Metric::Tokens, WindowSize::Minute) => self.tokens_per_minute,
            (Metric::Tokens, WindowSize::Day) => self.tokens_per_day,
        }
    }
}

/// Full rate-limit configuration: global defaults plus per-dimension
/// overrides keyed by the dimension's identity value.
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub defaults: ScopeLimits,
    pub per_user: HashMap<String, ScopeLimits>,
    pub per_api_key: HashMap<String, ScopeLimits>,
    pub per_provider: HashMap<String, ScopeLimits>,
    pub per_provider_model: HashMap<String, ScopeLimits>,
    /// Estimation constant: `ceil(sample_bytes / bytes_per_token)`.
    pub bytes_per_token: u64,
    pub max_sample_bytes: usize,
}

/// One (scope key, limits) pair the engine must check before allowing a
/// reservation. Built fresh per request from `RateLimitConfig` + the
/// request's `ScopeKeys` — global, per-user, per-api-key, per-provider,
/// per-provider+model, per spec §4.8.
fn applicable_scopes(config: &RateLimitConfig, scope: &ScopeKeys) -> Vec<(String, ScopeLimits)> {
    let mut scopes = Vec::new();

    if config.defaults.requests_per_minute.is_some()
        || config.defaults.requests_per_day.is_some()
        || config.defaults.tokens_per_minute.is_some()
        || config.defaults.tokens_per_day.is_some()
    {
        scopes.push(("global".to_string(), config.defaults.clone()));
    }

    if let Some(user_id) = &scope.user_id {
        if let Some(limits) = config.per_user.get(user_id) {
            scopes.push((format!("user:{user_id}"), limits.clone()));
        }
    }
    if let Some(api_key) = &scope.api_key {
        if let Some(limits) = config.per_api_key.get(api_key) {
            scopes.push((format!("key:{api_key}"), limits.clone()));
        }
    }
    if let Some(provider) = &scope.provider {
        if let Some(limits) = config.per_provider.get(provider) {
            scopes.push((format!("provider:{provider}"), limits.clone()));
        }
        if let Some(model) = &scope.model {
            let composite = format!("{provider}:{model}");
            if let Some(limits) = config.per_provider_model.get(&composite) {
                scopes.push((format!("provider_model:{composite}"), limits.clone()));
            }
        }
    }

    scopes
}

/// A backend-unreachable signal, kept separate from a normal window state
/// so the caller can distinguish "limit exceeded" (429) from "couldn't even
/// ask" (spec §7's fail-closed 500), rather than conflating the two into a
/// fabricated denial.
#[derive(Debug, Clone, Copy)]
pub struct BackendUnreachable;

/// The pluggable backend contract. A single scope's operations must be
/// serializable; across scopes no ordering is guaranteed (spec §5).
#[async_trait::async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Attempt to debit `amount` units of `metric` from `scope_key`'s
    /// `window` bucket, whose cap is `limit`. Returns the resulting window
    /// state on success; `Err(BackendUnreachable)` only when the backend
    /// itself could not be consulted at all (spec §7's `BackendError`).
    async fn check_and_reserve(
        &self,
        scope_key: &str,
        metric: Metric,
        window: WindowSize,
        limit: i64,
        amount: i64,
        now_unix: i64,
    ) -> Result<RateLimitWindow, BackendUnreachable>;

    /// Apply a signed delta (positive consumes further, negative
    /// releases) to a scope/metric/window bucket post-hoc.
    async fn adjust(
        &self,
        scope_key: &str,
        metric: Metric,
        window: WindowSize,
        delta: i64,
        now_unix: i64,
    );
}

/// Ties a `RateLimitConfig` to a `RateLimitBackend`, exposing the two
/// operations the pipeline actually calls: `reserve` (pre-dispatch) and
/// `adjust` (post-parse reconciliation).
pub struct RateLimiter {
    config: RateLimitConfig,
    backend: Box<dyn RateLimitBackend>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, backend: Box<dyn RateLimitBackend>) -> Self {
        Self { config, backend }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn bytes_per_token(&self) -> u64 {
        self.config.bytes_per_token.max(1)
    }

    pub fn max_sample_bytes(&self) -> usize {
        self.config.max_sample_bytes
    }

    /// Reserve `amount_tokens` tokens plus one request unit across every
    /// applicable window for `scope`. Allowed only if *every* window
    /// permits the full amount (spec §4.8); on denial, reports the first
    /// failing window and rolls back every window already committed in
    /// this call so a denied request never leaves a partial debit behind.
    pub async fn check_and_reserve(
        &self,
        scope: &ScopeKeys,
        amount_tokens: i64,
        now_unix: i64,
    ) -> ReserveOutcome {
        let scopes = applicable_scopes(&self.config, scope);
        let mut committed: Vec<(&str, Metric, WindowSize, i64)> = Vec::new();

        for (scope_key, limits) in &scopes {
            for (metric, window, amount, reason) in [
                (Metric::Requests, WindowSize::Minute, 1, "minute limit exceeded"),
                (Metric::Requests, WindowSize::Day, 1, "day limit exceeded"),
                (Metric::Tokens, WindowSize::Minute, amount_tokens, "minute limit exceeded"),
                (Metric::Tokens, WindowSize::Day, amount_tokens, "day limit exceeded"),
            ] {
                let Some(limit) = limits.limit_for(metric, window) else {
                    continue;
                };
                match self
                    .backend
                    .check_and_reserve(scope_key, metric, window, limit, amount, now_unix)
                    .await
                {
                    Ok(state) if !state.allowed => {
                        self.rollback(&committed, now_unix).await;
                        return denial(state, reason);
                    }
                    Ok(_) => committed.push((scope_key, metric, window, amount)),
                    Err(BackendUnreachable) => {
                        tracing::error!(scope_key, metric = metric.as_str(), "rate limit backend unreachable, failing closed");
                        self.rollback(&committed, now_unix).await;
                        return ReserveOutcome::BackendError;
                    }
                }
            }
        }

        ReserveOutcome::Allowed(crate::gateway::types::Reservation {
            scope: scope.clone(),
            tokens: amount_tokens,
        })
    }

    /// Release every window already debited earlier in the same
    /// `check_and_reserve` call, so a denial in one window never leaves a
    /// stranded partial reservation in another (spec §4.8 atomicity).
    async fn rollback(&self, committed: &[(&str, Metric, WindowSize, i64)], now_unix: i64) {
        for (scope_key, metric, window, amount) in committed {
            self.backend.adjust(scope_key, *metric, *window, -amount, now_unix).await;
        }
    }

    /// Post-response reconciliation: `delta = actual_input_tokens -
    /// estimated_input_tokens`. Only the token-minute/day windows for each
    /// applicable scope are adjusted; requests windows are never
    /// retroactively touched (spec §4.8, Open Question: input-only
    /// reconciliation, preserved from the source).
    pub async fn adjust(&self, scope: &ScopeKeys, delta_tokens: i64, now_unix: i64) {
        if delta_tokens == 0 {
            return;
        }
        for (scope_key, limits) in applicable_scopes(&self.config, scope) {
            if limits.tokens_per_minute.is_some() {
                self.backend
                    .adjust(&scope_key, Metric::Tokens, WindowSize::Minute, delta_tokens, now_unix)
                    .await;
            }
            if limits.tokens_per_day.is_some() {
                self.backend
                    .adjust(&scope_key, Metric::Tokens, WindowSize::Day, delta_tokens, now_unix)
                    .await;
            }
        }
    }

    /// Release a reservation taken before dispatch began but never used
    /// (e.g. client disconnected before the upstream call started).
    pub async fn release(&self, scope: &ScopeKeys, reserved_tokens: i64, now_unix: i64) {
        self.adjust(scope, -reserved_tokens, now_unix).await;
    }
}

fn denial(state: RateLimitWindow, reason: &str) -> ReserveOutcome {
    ReserveOutcome::Denied {
        reason: reason.to_string(),
        retry_after_seconds: state.reset_seconds,
        window: state,
    }
}

/// `ceil(sample_bytes / bytes_per_token)`, per spec §4.8's estimation
/// policy. Falls back to `content_length / bytes_per_token` when no body
/// sample was taken.
pub fn estimate_tokens(sample_bytes: Option<usize>, content_length: Option<u64>, bytes_per_token: u64) -> i64 {
    let bytes_per_token = bytes_per_token.max(1);
    let bytes = sample_bytes
        .map(|b| b as u64)
        .or(content_length)
        .unwrap_or(0);
    ((bytes + bytes_per_token - 1) / bytes_per_token) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ratelimit::memory::MemoryBackend;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(Some(100), None, 4), 25);
        assert_eq!(estimate_tokens(Some(101), None, 4), 26);
        assert_eq!(estimate_tokens(None, Some(40), 4), 10);
        assert_eq!(estimate_tokens(None, None, 4), 0);
    }

    /// A request denied by a later window in the same scope must not leave
    /// an earlier window in that scope permanently debited.
    #[tokio::test]
    async fn denied_request_rolls_back_earlier_windows_in_same_scope() {
        let config = RateLimitConfig {
            enabled: true,
            defaults: ScopeLimits {
                requests_per_minute: Some(10),
                tokens_per_minute: Some(20),
                ..Default::default()
            },
            ..Default::default()
        };
        let limiter = RateLimiter::new(config, Box::new(MemoryBackend::new()));
        let scope = ScopeKeys::default();

        // 29 tokens exceeds the 20-token-per-minute cap, so every one of
        // these should be denied on the tokens window after the requests
        // window already allowed and debited it.
        for _ in 0..10 {
            let outcome = limiter.check_and_reserve(&scope, 29, 0).await;
            assert!(matches!(outcome, ReserveOutcome::Denied { .. }));
        }

        // The requests-per-minute bucket must still have all 10 slots
        // free — none of the denied requests should have consumed one.
        let outcome = limiter.check_and_reserve(&scope, 1, 0).await;
        assert!(matches!(outcome, ReserveOutcome::Allowed(_)));
    }
}
