//! In-memory rate-limit backend: a sharded map so cross-scope reservations
//! proceed in parallel while a single scope's updates serialize through
//! the shard's lock (spec §5's concurrency model, no global mutex).
//! Grounded on the `dashmap`-based state map used by this corpus's
//! `ultrafast-ai-gateway`-shaped crates for the same purpose.

use dashmap::DashMap;

use crate::gateway::types::{Metric, RateLimitWindow, WindowSize};

use super::{BackendUnreachable, RateLimitBackend};

struct WindowState {
    window_start: i64,
    used: i64,
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

fn key(scope_key: &str, metric: Metric, window: WindowSize) -> String {
    format!("{scope_key}\u{0}{}\u{0}{}", metric.as_str(), window.as_str())
}

#[derive(Default)]
pub struct MemoryBackend {
    windows: DashMap<String, WindowState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RateLimitBackend for MemoryBackend {
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
        let mut entry = self
            .windows
            .entry(key(scope_key, metric, window))
            .or_insert_with(|| WindowState {
                window_start,
                used: 0,
            });

        if entry.window_start != window_start {
            entry.window_start = window_start;
            entry.used = 0;
        }

        let tentative = entry.used + amount;
        let allowed = tentative <= limit;
        if allowed {
            entry.used = tentative;
        }

        Ok(RateLimitWindow {
            metric,
            window,
            scope_key: scope_key.to_string(),
            limit,
            remaining: (limit - entry.used).clamp(0, limit),
            reset_seconds: (window_end - now_unix).max(0),
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
        let (window_start, _) = window_boundary(window, now_unix);
        let mut entry = self
            .windows
            .entry(key(scope_key, metric, window))
            .or_insert_with(|| WindowState {
                window_start,
                used: 0,
            });

        if entry.window_start != window_start {
            entry.window_start = window_start;
            entry.used = 0;
        }
        entry.used = (entry.used + delta).max(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_the_second_request_when_limit_is_one() {
        let backend = MemoryBackend::new();
        let now = 1_000_000i64 - (1_000_000i64 % 60); // aligned to a minute boundary
        let first = backend
            .check_and_reserve("global", Metric::Requests, WindowSize::Minute, 1, 1, now)
            .await
            .unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        let second = backend
            .check_and_reserve("global", Metric::Requests, WindowSize::Minute, 1, 1, now + 1)
            .await
            .unwrap();
        assert!(!second.allowed);
        // Invariant (spec §3): remaining is reported as 0, never negative,
        // even though the attempted reservation was denied.
        assert_eq!(second.remaining, 0);
    }

    #[tokio::test]
    async fn remaining_never_exceeds_limit() {
        let backend = MemoryBackend::new();
        let now = 0;
        let state = backend
            .check_and_reserve("scope", Metric::Tokens, WindowSize::Minute, 20, 5, now)
            .await
            .unwrap();
        assert!(state.remaining <= state.limit);
        assert!(state.remaining >= 0);
    }

    #[tokio::test]
    async fn window_resets_after_its_boundary() {
        let backend = MemoryBackend::new();
        let first_window = 0;
        let second_window = 60; // next minute boundary

        let used_up = backend
            .check_and_reserve("scope", Metric::Requests, WindowSize::Minute, 1, 1, first_window)
            .await
            .unwrap();
        assert_eq!(used_up.remaining, 0);
        assert!(used_up.allowed);

        let after_reset = backend
            .check_and_reserve("scope", Metric::Requests, WindowSize::Minute, 1, 1, second_window)
            .await
            .unwrap();
        assert_eq!(after_reset.remaining, 0);
        assert!(after_reset.allowed);
    }

    #[tokio::test]
    async fn adjust_releases_a_negative_delta() {
        let backend = MemoryBackend::new();
        let now = 0;
        backend
            .check_and_reserve("scope", Metric::Tokens, WindowSize::Minute, 100, 50, now)
            .await
            .unwrap();
        backend
            .adjust("scope", Metric::Tokens, WindowSize::Minute, -20, now)
            .await;
        let state = backend
            .check_and_reserve("scope", Metric::Tokens, WindowSize::Minute, 100, 0, now)
            .await
            .unwrap();
        assert_eq!(state.remaining, 70);
    }
}
