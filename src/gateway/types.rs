//! Core data model shared across pipeline stages (spec §3).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Token-usage and identification metadata extracted from an upstream
/// response, either complete or partially captured off a streaming
/// transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub provider: String,
    pub model: Option<String>,
    pub request_id: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub thought_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub is_streaming: bool,
    pub finish_reason: Option<String>,
}

impl ResponseMetadata {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    /// True when enough fields were captured to call this complete rather
    /// than a partial streaming snapshot.
    pub fn has_usage(&self) -> bool {
        self.input_tokens.is_some() || self.output_tokens.is_some() || self.total_tokens.is_some()
    }

    /// Invariant from spec §3: if input/output/total are all positive,
    /// total == input + output + thought (thought may be 0).
    #[cfg(test)]
    pub fn respects_total_invariant(&self) -> bool {
        match (self.input_tokens, self.output_tokens, self.total_tokens) {
            (Some(i), Some(o), Some(t)) if i > 0 && o > 0 && t > 0 => {
                t == i + o + self.thought_tokens.unwrap_or(0)
            }
            _ => true,
        }
    }
}

/// The composite identity a rate-limit reservation is scoped under. Any
/// field may be empty — an empty field simply drops that dimension's
/// window from the applicable set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeKeys {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
}

/// The metric a rate-limit window tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Requests,
    Tokens,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Requests => "requests",
            Metric::Tokens => "tokens",
        }
    }
}

/// The tumbling window size a rate-limit counter is tracked over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSize {
    Minute,
    Day,
}

impl WindowSize {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowSize::Minute => "minute",
            WindowSize::Day => "day",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            WindowSize::Minute => Duration::from_secs(60),
            WindowSize::Day => Duration::from_secs(86_400),
        }
    }
}

/// A snapshot of one rate-limit window's state, returned to describe the
/// first failing window on denial (or informationally on success).
/// Invariant (spec §3): `remaining` is always in `0..=limit` — whether the
/// reservation was actually allowed is carried separately in `allowed`,
/// since an over-limit attempt is reported to the client as `remaining: 0`
/// rather than a negative number.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub metric: Metric,
    pub window: WindowSize,
    pub scope_key: String,
    pub limit: i64,
    pub remaining: i64,
    pub reset_seconds: i64,
    pub allowed: bool,
}

/// A tentative debit against a scope's counters, taken before dispatch.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub scope: ScopeKeys,
    pub tokens: i64,
}

/// Outcome of `check_and_reserve`.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    Allowed(Reservation),
    Denied {
        reason: String,
        retry_after_seconds: i64,
        window: RateLimitWindow,
    },
    /// The backend itself could not be consulted (spec §7's `BackendError`,
    /// fail-closed) — distinct from a normal over-limit denial.
    BackendError,
}

/// Per-request state threaded explicitly through the pipeline stages.
/// Never stored in ambient/task-local storage — mutated in place by each
/// stage in the fixed order from spec §4.9.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub original_path: String,
    pub rewritten_path: String,
    pub user_id: Option<String>,
    pub estimated_tokens: i64,
    pub reservation: Option<Reservation>,
    pub metadata: Option<ResponseMetadata>,
}

/// A bounded prefix of a request body plus a way to get a fresh full-body
/// reader, so a later stage can re-consume the stream from the start.
#[derive(Debug, Clone)]
pub struct BodySample {
    pub bytes: bytes::Bytes,
    pub truncated: bool,
}

impl BodySample {
    /// A cheap "restart" — the full body is already buffered in `bytes`,
    /// so handing back a clone satisfies the "read it again in full, in
    /// order" requirement without any re-reading of an underlying stream.
    pub fn restart(&self) -> bytes::Bytes {
        self.bytes.clone()
    }
}
