use std::collections::HashMap;
use std::env;

use crate::gateway::ratelimit::{RateLimitConfig, ScopeLimits};

/// Per-provider settings the config source supplies (spec §6): the
/// upstream base URL and whether the provider is enabled at all.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub admin_key: String,
    pub listen_addr: String,
    /// Comma-separated list of allowed CORS origins, or "*" for any.
    pub cors_origin: String,
    /// Number of days to retain request logs. 0 = keep forever.
    pub log_retention_days: u32,
    /// Whether to store the full request body in the metrics sink.
    pub log_request_body: bool,
    /// Whether to store the full response body in the metrics sink.
    pub log_response_body: bool,

    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub gemini: ProviderConfig,

    /// "memory" or "remote" (Redis-backed) rate-limit backend.
    pub rate_limit_backend: String,
    pub rate_limit: RateLimitConfig,
}

/// Env values may contain underscore separators for readability
/// (`1_000_000`), which are cosmetic only (spec §6) — strip before parsing.
fn strip_underscores(raw: &str) -> String {
    raw.chars().filter(|c| *c != '_').collect()
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn parse_i64_env(key: &str) -> Option<i64> {
    env::var(key).ok().and_then(|v| strip_underscores(&v).parse().ok())
}

fn parse_u64_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| strip_underscores(&v).parse().ok())
        .unwrap_or(default)
}

fn parse_usize_env(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| strip_underscores(&v).parse().ok())
        .unwrap_or(default)
}

fn provider_config(prefix: &str, default_base_url: &str) -> ProviderConfig {
    ProviderConfig {
        base_url: env::var(format!("{prefix}_BASE_URL")).unwrap_or_else(|_| default_base_url.to_string()),
        enabled: parse_bool_env(&format!("{prefix}_ENABLED"), true),
    }
}

/// Parse `PREFIX_REQUESTS_PER_MINUTE` etc. into a `ScopeLimits`.
fn scope_limits_from_env(prefix: &str) -> ScopeLimits {
    ScopeLimits {
        requests_per_minute: parse_i64_env(&format!("{prefix}_REQUESTS_PER_MINUTE")),
        requests_per_day: parse_i64_env(&format!("{prefix}_REQUESTS_PER_DAY")),
        tokens_per_minute: parse_i64_env(&format!("{prefix}_TOKENS_PER_MINUTE")),
        tokens_per_day: parse_i64_env(&format!("{prefix}_TOKENS_PER_DAY")),
    }
}

/// Per-dimension overrides are supplied as `PREFIX__{key}__METRIC`, e.g.
/// `RATE_LIMIT_PER_KEY__devkey__REQUESTS_PER_MINUTE=1`. This keeps the
/// overrides expressible from plain environment variables without a nested
/// config format, matching the teacher's flat `Config::from_env` style.
fn overrides_from_env(var_prefix: &str) -> HashMap<String, ScopeLimits> {
    let marker = format!("{var_prefix}__");
    let mut grouped: HashMap<String, Vec<(String, String)>> = HashMap::new();

    for (key, value) in env::vars() {
        let Some(rest) = key.strip_prefix(&marker) else {
            continue;
        };
        let Some((scope_key, metric_field)) = rest.split_once("__") else {
            continue;
        };
        grouped
            .entry(scope_key.to_string())
            .or_default()
            .push((metric_field.to_string(), value));
    }

    grouped
        .into_iter()
        .map(|(scope_key, fields)| {
            let mut limits = ScopeLimits::default();
            for (field, value) in fields {
                let parsed = strip_underscores(&value).parse().ok();
                match field.as_str() {
                    "REQUESTS_PER_MINUTE" => limits.requests_per_minute = parsed,
                    "REQUESTS_PER_DAY" => limits.requests_per_day = parsed,
                    "TOKENS_PER_MINUTE" => limits.tokens_per_minute = parsed,
                    "TOKENS_PER_DAY" => limits.tokens_per_day = parsed,
                    _ => {}
                }
            }
            (scope_key, limits)
        })
        .collect()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let rate_limit = RateLimitConfig {
            enabled: parse_bool_env("RATE_LIMIT_ENABLED", true),
            defaults: scope_limits_from_env("RATE_LIMIT_DEFAULT"),
            per_user: overrides_from_env("RATE_LIMIT_PER_USER"),
            per_api_key: overrides_from_env("RATE_LIMIT_PER_KEY"),
            per_provider: overrides_from_env("RATE_LIMIT_PER_PROVIDER"),
            per_provider_model: overrides_from_env("RATE_LIMIT_PER_PROVIDER_MODEL"),
            bytes_per_token: parse_u64_env("BYTES_PER_TOKEN", 4),
            max_sample_bytes: parse_usize_env("MAX_SAMPLE_BYTES", 64 * 1024),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            admin_key: env::var("ADMIN_KEY")
                .map_err(|_| anyhow::anyhow!("ADMIN_KEY is required"))?,
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".into()),
            log_retention_days: env::var("LOG_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7),
            log_request_body: parse_bool_env("LOG_REQUEST_BODY", false),
            log_response_body: parse_bool_env("LOG_RESPONSE_BODY", false),

            openai: provider_config("OPENAI", "https://api.openai.com"),
            anthropic: provider_config("ANTHROPIC", "https://api.anthropic.com"),
            gemini: provider_config("GEMINI", "https://generativelanguage.googleapis.com"),

            rate_limit_backend: env::var("RATE_LIMIT_BACKEND").unwrap_or_else(|_| "memory".into()),
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_cosmetic_underscores_before_parsing() {
        assert_eq!(strip_underscores("1_000_000"), "1000000");
        assert_eq!(strip_underscores("4"), "4");
    }
}
