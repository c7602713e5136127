//! Provider Handler (C2): the polymorphic per-upstream contract. Modeled
//! as an open capability set (trait object) rather than a closed enum per
//! spec §9's design note, so a fourth provider can be added without
//! touching the registry or the pipeline.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;

use super::types::{BodySample, ResponseMetadata};

/// Outcome of parsing one chunk (or the whole transcript so far) of a
/// streaming response. Parsers are linear event consumers — they only
/// transition forward, and re-parsing an identical-or-growing buffer from
/// scratch must never double-count tokens (spec §4.4 idempotence).
#[derive(Debug, Clone)]
pub enum StreamParse {
    /// Usage is complete (saw a terminal event).
    Final(ResponseMetadata),
    /// Usage is partially known; stream hasn't terminated (or terminated
    /// without ever reporting usage, but at least one field was seen).
    Partial(ResponseMetadata),
    /// Nothing usable was found yet.
    Empty,
}

/// A non-streaming parse failure. Non-fatal to the client per spec §7 —
/// the observer still forwards the original bytes untouched.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to parse {provider} response metadata: {reason}")]
pub struct MetadataParseError {
    pub provider: &'static str,
    pub reason: String,
}

/// Everything a handler needs to decide streaming-ness and pull identity
/// out of a request without re-reading its body.
pub struct RequestSignal<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub sample: Option<&'a BodySample>,
}

/// The provider-native way an indirected API key is substituted back into
/// the upstream request (spec §4.2's auth convention per provider).
pub enum KeyPlacement {
    AuthorizationBearer,
    GoogApiKeyHeader,
    QueryParam(&'static str),
}

pub trait ProviderHandler: Send + Sync {
    /// Stable identifier used in the path prefix and response headers.
    fn name(&self) -> &'static str;

    /// Upstream base URL this provider's requests are proxied to.
    fn base_url(&self) -> &str;

    /// Where a resolved (de-indirected) API key gets placed on the
    /// upstream request.
    fn key_placement(&self) -> KeyPlacement;

    /// Decision policy from spec §4.2: Accept header, then URL shape, then
    /// (at most) a bounded body sample. Gemini overrides this to never
    /// look at `sample` at all — the hard constraint in §4.2.
    fn is_streaming_request(&self, signal: &RequestSignal) -> bool;

    /// Provider-native identity extraction, bounded by a cheap body
    /// sample. Returns `None` when no identity field is present or no
    /// sample was taken.
    fn user_id_from_request(&self, sample: Option<&BodySample>) -> Option<String>;

    /// Strip this provider's path prefix, leaving the path the upstream
    /// actually expects (e.g. `/openai/v1/chat/completions` ->
    /// `/v1/chat/completions`).
    fn strip_prefix<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix('/')
            .and_then(|p| p.strip_prefix(self.name()))
            .unwrap_or(path)
    }

    /// Parse a complete, non-streaming JSON response body.
    fn parse_non_streaming(&self, bytes: &[u8]) -> Result<ResponseMetadata, MetadataParseError>;

    /// Parse an SSE transcript — called repeatedly on a growing buffer by
    /// the response observer; must be idempotent (parse-from-scratch is
    /// the safe default, per spec §4.4's design note).
    fn parse_streaming(&self, buffer: &[u8]) -> StreamParse;
}

/// Non-streaming JSON parse of an upstream body, with gzip fallback per
/// spec §4.4 ("the upstream transport requests identity encoding, but
/// some upstreams reply gzip anyway").
pub fn decode_json_body(bytes: &[u8]) -> Result<serde_json::Value, std::io::Error> {
    let raw = if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        out
    } else {
        bytes.to_vec()
    };
    serde_json::from_slice(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Scan an SSE transcript's `data:` lines into parsed JSON payloads,
/// skipping `[DONE]` and unparseable lines (logged by the caller as a
/// warning, never fatal — spec §4.4).
pub fn sse_data_events(buffer: &[u8]) -> Vec<serde_json::Value> {
    let text = String::from_utf8_lossy(buffer);
    let mut events = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(v) => events.push(v),
            Err(e) => {
                tracing::warn!("skipping unparseable SSE payload: {e}");
            }
        }
    }
    events
}
