//! Pipeline Assembly (C9): the fixed per-request stage order from spec
//! §4.9 — URL rewrite, identity resolution, CORS, auth, rate-limit
//! reservation, dispatch with observation, metadata parse, and post-hoc
//! reconciliation. Every collaborator (C1-C8) is wired together here; no
//! stage reaches around another.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Spec §4.2: "3min response-header timeout" — bounds only the wait for
/// upstream response headers, not the subsequent body/stream read.
const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(180);

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tokio::sync::oneshot;

use super::error::GatewayError;
use super::identity::{client_ip, resolve_user_id};
use super::keystore::KeyStore;
use super::metrics::{MetricsRecord, MetricsSink};
use super::observer::{ObservedStream, TeeBuffer};
use super::providers::{RequestSignal, StreamParse};
use super::proxy_headers::{apply_cors, apply_metadata_headers, apply_streaming_hygiene, copy_forward_headers, is_hop_by_hop};
use super::ratelimit::{estimate_tokens, RateLimiter};
use super::registry::ProviderRegistry;
use super::rewrite::rewrite;
use super::sample;
use super::types::{RequestContext, Reservation, ReserveOutcome, ScopeKeys};

/// Everything a request needs from `AppState`, held as cheaply-cloneable
/// handles so the streaming path's reconciliation task can outlive the
/// handler that spawned it.
#[derive(Clone)]
pub struct PipelineContext {
    pub registry: Arc<ProviderRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub key_store: Arc<dyn KeyStore>,
    pub metrics: Arc<dyn MetricsSink>,
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn first_path_segment(path: &str) -> Option<&str> {
    path.trim_start_matches('/').split('/').next().filter(|s| !s.is_empty())
}

/// A short, non-secret-leaking stand-in for the inbound key in rate-limit
/// scope identifiers and response headers — mirrors the identity
/// resolver's `token:{8 chars}` convention.
fn scope_key_for_api_key(raw: &str) -> String {
    raw.chars().take(8).collect()
}

fn stripped_response_headers(upstream: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    out
}

fn error_response(err: GatewayError, is_streaming: bool) -> Response {
    let mut response = err.into_response();
    apply_cors(response.headers_mut(), is_streaming);
    response
}

/// Entry point called for every inbound request the router doesn't
/// short-circuit itself (health, admin). `peer_addr` is the accepted TCP
/// peer, used only as the last resort in the identity/IP chains.
pub async fn run(ctx: PipelineContext, method: Method, uri: Uri, headers: HeaderMap, body: Body, peer_addr: Option<String>) -> Response {
    let start = Instant::now();
    let original_path = uri.path().to_string();

    // CORS preflight short-circuits before the URL rewrite even runs
    // (spec §6): OPTIONS never reaches a provider handler.
    if method == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_cors(response.headers_mut(), false);
        return response;
    }

    // Per-request state (spec §3's `RequestContext`), mutated in place as
    // each stage below runs — never stashed in ambient/task-local storage.
    let mut req_ctx = RequestContext {
        original_path: original_path.clone(),
        ..Default::default()
    };

    // C5: URL rewrite.
    let rewritten = rewrite(&original_path, &ctx.registry);
    let path = rewritten.path;
    req_ctx.rewritten_path = path.clone();

    let Some(provider_name) = first_path_segment(&path).filter(|p| ctx.registry.is_known(p)) else {
        let mut response = StatusCode::NOT_FOUND.into_response();
        apply_cors(response.headers_mut(), false);
        return response;
    };
    let provider_name = provider_name.to_string();

    let entry = ctx.registry.lookup(&provider_name).expect("just checked is_known");
    let handler = entry.handler.as_ref();
    let is_gemini = provider_name == "gemini";

    let content_length = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    // C3: body sampling never touches Gemini's media uploads (spec §4.2's
    // hard constraint) — its request body is streamed straight through.
    // Every other provider's prompt bodies are small JSON, so buffering
    // them fully is the documented simplification that also gives the
    // sampler and the identity resolver a cheap restartable reader.
    let (body_bytes, upstream_body): (Option<Bytes>, reqwest::Body) = if is_gemini {
        (None, reqwest::Body::wrap_stream(body.into_data_stream()))
    } else {
        match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => {
                let forward = reqwest::Body::from(bytes.clone());
                (Some(bytes), forward)
            }
            Err(e) => {
                return error_response(
                    GatewayError::UpstreamConnectError(format!("failed to read request body: {e}")),
                    false,
                );
            }
        }
    };

    let body_sample = body_bytes
        .as_ref()
        .and_then(|b| sample::sample(&headers, b, ctx.rate_limiter.max_sample_bytes()));

    let signal = RequestSignal {
        method: &method,
        uri: &uri,
        headers: &headers,
        sample: body_sample.as_ref(),
    };
    let is_streaming = handler.is_streaming_request(&signal);

    // C6: identity resolution.
    let user_id = resolve_user_id(
        rewritten.user_id.as_deref(),
        &headers,
        &uri,
        body_sample.as_ref(),
        handler,
        peer_addr.as_deref(),
    );
    let ip = client_ip(&headers, peer_addr.as_deref());
    req_ctx.user_id = Some(user_id.clone());

    // Auth: the gateway always presents itself to the caller as a single
    // bearer-token surface; the key store resolves `iw:`-indirected keys
    // and the provider's `key_placement` decides where the real key lands
    // on the upstream request (spec §4.2, §4.6).
    let inbound_key = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    let Some(inbound_key) = inbound_key else {
        return error_response(GatewayError::AuthError("missing API key".into()), is_streaming);
    };

    let resolved_key = match ctx.key_store.validate_and_get_actual_key(&inbound_key).await {
        Ok(k) => k,
        Err(e) => return error_response(e, is_streaming),
    };

    // C8: reserve before dispatch.
    let model = body_sample
        .as_ref()
        .and_then(|s| serde_json::from_slice::<serde_json::Value>(&s.bytes).ok())
        .and_then(|v| v.get("model").and_then(|m| m.as_str()).map(|s| s.to_string()));

    let scope = ScopeKeys {
        provider: Some(provider_name.clone()),
        model: model.clone(),
        api_key: Some(scope_key_for_api_key(&inbound_key)),
        user_id: Some(user_id.clone()),
    };

    let estimated_tokens = estimate_tokens(
        body_sample.as_ref().map(|s| s.bytes.len()),
        content_length,
        ctx.rate_limiter.bytes_per_token(),
    );
    req_ctx.estimated_tokens = estimated_tokens;

    let reservation_tokens = if ctx.rate_limiter.enabled() {
        match ctx.rate_limiter.check_and_reserve(&scope, estimated_tokens, now_unix()).await {
            ReserveOutcome::Allowed(r) => {
                req_ctx.reservation = Some(Reservation {
                    scope: scope.clone(),
                    tokens: r.tokens,
                });
                Some(r.tokens)
            }
            ReserveOutcome::Denied { reason, retry_after_seconds, window } => {
                return error_response(
                    GatewayError::RateLimitDenied {
                        reason,
                        retry_after_seconds,
                        scope_key: window.scope_key.clone(),
                        window,
                    },
                    is_streaming,
                );
            }
            // Spec §7: fail closed rather than let an unreachable backend
            // silently allow unmetered spend.
            ReserveOutcome::BackendError => {
                return error_response(GatewayError::BackendError, is_streaming);
            }
        }
    } else {
        None
    };

    // C2: dispatch. Hop-by-hop headers are stripped both ways; the
    // client's own Authorization is never forwarded — each provider's
    // `KeyPlacement` decides the upstream auth shape from scratch.
    let mut upstream_headers = HeaderMap::new();
    copy_forward_headers(&headers, &mut upstream_headers);
    upstream_headers.remove(axum::http::header::AUTHORIZATION);

    let mut upstream_url = format!("{}{}", handler.base_url(), handler.strip_prefix(&path));
    if let Some(query) = uri.query() {
        upstream_url.push('?');
        upstream_url.push_str(query);
    }

    match handler.key_placement() {
        super::providers::KeyPlacement::AuthorizationBearer => {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", resolved_key.actual_key)) {
                upstream_headers.insert(axum::http::header::AUTHORIZATION, v);
            }
        }
        super::providers::KeyPlacement::GoogApiKeyHeader => {
            if let Ok(v) = HeaderValue::from_str(&resolved_key.actual_key) {
                upstream_headers.insert(HeaderName::from_static("x-goog-api-key"), v);
            }
        }
        super::providers::KeyPlacement::QueryParam(name) => {
            let sep = if upstream_url.contains('?') { '&' } else { '?' };
            upstream_url = format!("{upstream_url}{sep}{name}={}", resolved_key.actual_key);
        }
    }

    let request_size = body_bytes.as_ref().map(|b| b.len() as u64).unwrap_or_else(|| content_length.unwrap_or(0));

    let request_builder = entry
        .client
        .request(method, &upstream_url)
        .headers(upstream_headers)
        .body(upstream_body);

    // `send()` resolves as soon as response headers arrive, before the body
    // is read — wrapping it (rather than the client-level `.timeout()`) is
    // what gives us spec §4.2's 3-minute response-header timeout without
    // also capping how long a streaming body may subsequently run.
    let upstream_resp = match tokio::time::timeout(RESPONSE_HEADER_TIMEOUT, request_builder.send()).await {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => {
            // Dispatch never started: per spec §4.9's conservative policy
            // the reservation is left to expire naturally rather than
            // released, since a connect failure this early is rare and
            // treating it as a release would risk double-crediting a
            // retrying client's next attempt.
            return error_response(GatewayError::UpstreamConnectError(e.to_string()), is_streaming);
        }
        Err(_elapsed) => {
            return error_response(
                GatewayError::UpstreamConnectError("timed out waiting for response headers".into()),
                is_streaming,
            );
        }
    };

    let status = upstream_resp.status();
    let mut out_headers = stripped_response_headers(upstream_resp.headers());

    if is_streaming {
        apply_streaming_hygiene(&mut out_headers);
        apply_cors(&mut out_headers, true);

        let tee = TeeBuffer::new();
        let bytes_written = Arc::new(Mutex::new(0u64));
        let (done_tx, done_rx) = oneshot::channel();
        let observed = ObservedStream::new(upstream_resp.bytes_stream(), tee.clone(), bytes_written.clone(), done_tx);
        let body = Body::from_stream(observed);

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = out_headers;

        let handler_arc = entry.handler.clone();
        let rate_limiter = ctx.rate_limiter.clone();
        let metrics = ctx.metrics.clone();
        let scope = scope.clone();
        let user_id_task = user_id.clone();
        let ip_task = ip.clone();
        let path_task = original_path.clone();
        let mut req_ctx_task = req_ctx.clone();

        tokio::spawn(async move {
            let completed = done_rx.await.unwrap_or(false);
            let response_size = *bytes_written.lock().expect("poisoned");
            let latency = start.elapsed();

            let metadata = if completed {
                match handler_arc.parse_streaming(&tee.snapshot()) {
                    StreamParse::Final(m) | StreamParse::Partial(m) => Some(m),
                    StreamParse::Empty => None,
                }
            } else {
                None
            };
            // Metadata only becomes known after the response has already
            // been returned to the caller, so this mutation lands on the
            // task's own clone rather than the `req_ctx` the handler holds.
            req_ctx_task.metadata = metadata.clone();

            if rate_limiter.enabled() {
                if let Some(meta) = &metadata {
                    let delta = meta.input_tokens.unwrap_or(0) - estimated_tokens;
                    rate_limiter.adjust(&scope, delta, now_unix()).await;
                } else if !completed {
                    // Best-effort: no metadata ever arrived, so release
                    // only the original estimate (spec §4.9).
                    if let Some(tokens) = reservation_tokens {
                        rate_limiter.release(&scope, tokens, now_unix()).await;
                    }
                }
            }

            tracing::trace!(
                rewritten_path = %req_ctx_task.rewritten_path,
                has_metadata = req_ctx_task.metadata.is_some(),
                "streaming request context finalized"
            );

            metrics
                .record(MetricsRecord {
                    metadata: metadata.as_ref(),
                    user_id: &user_id_task,
                    client_ip: &ip_task,
                    path: &path_task,
                    latency,
                    request_size,
                    response_size,
                    status: status.as_u16(),
                })
                .await;
        });

        return response;
    }

    apply_cors(&mut out_headers, false);

    let response_bytes = match upstream_resp.bytes().await {
        Ok(b) => b,
        Err(e) => {
            return error_response(GatewayError::UpstreamConnectError(e.to_string()), false);
        }
    };

    let parsed = handler.parse_non_streaming(&response_bytes);
    let metadata = match parsed {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!("metadata parse failed: {e}");
            None
        }
    };
    req_ctx.metadata = metadata.clone();

    if let Some(meta) = &metadata {
        apply_metadata_headers(&mut out_headers, meta);
        if ctx.rate_limiter.enabled() {
            let delta = meta.input_tokens.unwrap_or(0) - estimated_tokens;
            ctx.rate_limiter.adjust(&scope, delta, now_unix()).await;
        }
    }

    let mut response = Response::new(Body::from(response_bytes.clone()));
    *response.status_mut() = status;
    *response.headers_mut() = out_headers;

    ctx.metrics
        .record(MetricsRecord {
            metadata: metadata.as_ref(),
            user_id: &user_id,
            client_ip: &ip,
            path: &original_path,
            latency: start.elapsed(),
            request_size,
            response_size: response_bytes.len() as u64,
            status: status.as_u16(),
        })
        .await;

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::keystore::ResolvedKey;
    use crate::gateway::metrics::TracingMetricsSink;
    use crate::gateway::providers::openai::OpenAiHandler;
    use crate::gateway::ratelimit::memory::MemoryBackend;
    use crate::gateway::ratelimit::{RateLimitConfig, ScopeLimits};
    use axum::routing::post;
    use axum::Json;
    use tokio::net::TcpListener;

    #[test]
    fn first_segment_ignores_leading_slash_and_empties() {
        assert_eq!(first_path_segment("/openai/v1/x"), Some("openai"));
        assert_eq!(first_path_segment("/"), None);
        assert_eq!(first_path_segment(""), None);
    }

    #[test]
    fn scope_key_truncates_to_eight_chars() {
        assert_eq!(scope_key_for_api_key("abcdefghijkl"), "abcdefgh");
        assert_eq!(scope_key_for_api_key("short"), "short");
    }

    struct StubKeyStore;

    #[async_trait::async_trait]
    impl KeyStore for StubKeyStore {
        async fn validate_and_get_actual_key(&self, inbound_key: &str) -> Result<ResolvedKey, GatewayError> {
            if inbound_key == "bad-key" {
                return Err(GatewayError::AuthError("unknown key".into()));
            }
            Ok(ResolvedKey {
                actual_key: "upstream-secret".to_string(),
                provider_name: None,
            })
        }
    }

    fn disabled_rate_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitConfig::default(), Box::new(MemoryBackend::new())))
    }

    fn ctx_with(registry: ProviderRegistry, rate_limiter: Arc<RateLimiter>) -> PipelineContext {
        PipelineContext {
            registry: Arc::new(registry),
            rate_limiter,
            key_store: Arc::new(StubKeyStore),
            metrics: Arc::new(TracingMetricsSink),
        }
    }

    fn request(method: Method, uri: &str, bearer: Option<&str>, body: &'static str) -> (Method, Uri, HeaderMap, Body) {
        let mut headers = HeaderMap::new();
        if let Some(token) = bearer {
            headers.insert(
                axum::http::header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            );
        }
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        (method, uri.parse().unwrap(), headers, Body::from(body))
    }

    #[tokio::test]
    async fn unknown_provider_returns_404() {
        let ctx = ctx_with(ProviderRegistry::new(), disabled_rate_limiter());
        let (method, uri, headers, body) = request(Method::POST, "/nope/v1/x", Some("any-key"), "{}");
        let response = run(ctx, method, uri, headers, body, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_bearer_token_is_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiHandler::new("http://127.0.0.1:1".into())));
        let ctx = ctx_with(registry, disabled_rate_limiter());
        let (method, uri, headers, body) = request(Method::POST, "/openai/v1/chat/completions", None, "{}");
        let response = run(ctx, method, uri, headers, body, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unresolvable_key_is_rejected_before_dispatch() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiHandler::new("http://127.0.0.1:1".into())));
        let ctx = ctx_with(registry, disabled_rate_limiter());
        let (method, uri, headers, body) = request(Method::POST, "/openai/v1/chat/completions", Some("bad-key"), "{}");
        let response = run(ctx, method, uri, headers, body, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn zero_request_limit_denies_with_rate_limit_headers() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiHandler::new("http://127.0.0.1:1".into())));

        let config = RateLimitConfig {
            enabled: true,
            defaults: ScopeLimits {
                requests_per_minute: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        let rate_limiter = Arc::new(RateLimiter::new(config, Box::new(MemoryBackend::new())));
        let ctx = ctx_with(registry, rate_limiter);

        let (method, uri, headers, body) = request(Method::POST, "/openai/v1/chat/completions", Some("user-key"), "{}");
        let response = run(ctx, method, uri, headers, body, None).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        assert!(response.headers().contains_key("x-ratelimit-reason"));
    }

    /// Spins a tiny in-process upstream returning a canned chat-completion
    /// body, exercising the full non-streaming dispatch path end to end
    /// (auth resolution, dispatch, metadata parse, response headers).
    async fn spawn_fake_openai() -> String {
        let app = axum::Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "id": "chatcmpl-test",
                    "model": "gpt-4o",
                    "choices": [{"finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
                }))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn successful_non_streaming_dispatch_carries_metadata_headers() {
        let base_url = spawn_fake_openai().await;
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiHandler::new(base_url)));
        let ctx = ctx_with(registry, disabled_rate_limiter());

        let (method, uri, headers, body) = request(
            Method::POST,
            "/openai/v1/chat/completions",
            Some("user-key"),
            r#"{"model":"gpt-4o","messages":[]}"#,
        );
        let response = run(ctx, method, uri, headers, body, Some("10.0.0.1".into())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("access-control-allow-origin").is_some());
        assert_eq!(response.headers().get("x-llm-total-tokens").unwrap(), "15");
        assert_eq!(response.headers().get("x-llm-model").unwrap(), "gpt-4o");
    }

    /// Spec §8 scenario 2: global `requests_per_minute = 1` allows the first
    /// request and denies the second with the exact header set/values.
    #[tokio::test]
    async fn second_request_within_a_minute_denies_with_exact_headers() {
        let base_url = spawn_fake_openai().await;
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiHandler::new(base_url)));
        let config = RateLimitConfig {
            enabled: true,
            defaults: ScopeLimits {
                requests_per_minute: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let rate_limiter = Arc::new(RateLimiter::new(config, Box::new(MemoryBackend::new())));
        let ctx = ctx_with(registry, rate_limiter);

        let make_request = || request(
            Method::POST,
            "/openai/chat/completions",
            Some("user-key"),
            r#"{"model":"gpt-4o","messages":[]}"#,
        );

        let (m, u, h, b) = make_request();
        let first = run(ctx.clone(), m, u, h, b, None).await;
        assert_eq!(first.status(), StatusCode::OK);

        let (m, u, h, b) = make_request();
        let second = run(ctx.clone(), m, u, h, b, None).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = second.headers();
        assert_eq!(headers.get("x-ratelimit-reason").unwrap(), "minute limit exceeded");
        assert_eq!(headers.get("x-ratelimit-metric").unwrap(), "requests");
        assert_eq!(headers.get("x-ratelimit-window").unwrap(), "minute");
        assert_eq!(headers.get("x-ratelimit-scope").unwrap(), "global");
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "1");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
        // retry-after is seconds-to-minute-boundary, not a fixed 60 — it
        // only hits exactly 60 when the test happens to run on the tick.
        let retry_after: u64 = headers.get("retry-after").unwrap().to_str().unwrap().parse().unwrap();
        assert!((1..=60).contains(&retry_after), "retry-after out of range: {retry_after}");
    }

    /// Spec §8 scenario 3: a small `tokens_per_minute` budget denies once the
    /// estimated token count (body size / `bytes_per_token`) exceeds it.
    #[tokio::test]
    async fn tokens_per_minute_denies_via_body_size_estimate() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiHandler::new("http://127.0.0.1:1".into())));
        let config = RateLimitConfig {
            enabled: true,
            defaults: ScopeLimits {
                tokens_per_minute: Some(20),
                ..Default::default()
            },
            bytes_per_token: 4,
            max_sample_bytes: 4096,
            ..Default::default()
        };
        let rate_limiter = Arc::new(RateLimiter::new(config, Box::new(MemoryBackend::new())));
        let ctx = ctx_with(registry, rate_limiter);

        // 115-byte JSON body -> estimate of ceil(115/4) = 29 tokens, over the 20 budget.
        let (method, uri, headers, body) = request(
            Method::POST,
            "/openai/chat/completions",
            Some("user-key"),
            r#"{"model":"gpt-4o","messages":[],"padding":"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"}"#,
        );
        let response = run(ctx, method, uri, headers, body, None).await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("x-ratelimit-metric").unwrap(), "tokens");
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "20");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    }

    /// Spec §8 scenario 6: a per-api-key override denies its own caller
    /// while the global default (left unset) leaves everyone else unlimited.
    #[tokio::test]
    async fn per_api_key_scope_is_enforced_independently_of_global() {
        let base_url = spawn_fake_openai().await;
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(OpenAiHandler::new(base_url)));

        let mut per_api_key = std::collections::HashMap::new();
        per_api_key.insert(
            "devkey".to_string(),
            ScopeLimits {
                requests_per_minute: Some(1),
                ..Default::default()
            },
        );
        let config = RateLimitConfig {
            enabled: true,
            per_api_key,
            ..Default::default()
        };
        let rate_limiter = Arc::new(RateLimiter::new(config, Box::new(MemoryBackend::new())));
        let ctx = ctx_with(registry, rate_limiter);

        let make_request = || request(
            Method::POST,
            "/openai/chat/completions",
            Some("devkey"),
            r#"{"model":"gpt-4o","messages":[]}"#,
        );

        let (m, u, h, b) = make_request();
        let first = run(ctx.clone(), m, u, h, b, None).await;
        assert_eq!(first.status(), StatusCode::OK);

        let (m, u, h, b) = make_request();
        let second = run(ctx.clone(), m, u, h, b, None).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers().get("x-ratelimit-scope").unwrap(), "key:devkey");
    }
}
