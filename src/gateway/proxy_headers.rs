//! Header hygiene shared by every provider handler's upstream dispatch:
//! hop-by-hop stripping on the way out, streaming-response hygiene and
//! CORS on the way back (spec §4.2, §4.7, §6).

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// RFC 7230 §6.1 hop-by-hop headers, plus proxy-authorization — never
/// forwarded to the upstream or copied back to the client untouched.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str())
}

/// Copy every header from `from` to `to` except hop-by-hop ones, used when
/// forwarding the inbound request to the upstream.
pub fn copy_forward_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        to.insert(name.clone(), value.clone());
    }
}

/// Hygiene headers forced onto every detected streaming response
/// (spec §4.7/§6): disable caching/buffering and drop any upstream
/// `Content-Length` since the body length is no longer known up front.
pub fn apply_streaming_hygiene(headers: &mut HeaderMap) {
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.remove(axum::http::header::CONTENT_LENGTH);
}

/// CORS headers applied to every response, per spec §6.
pub fn apply_cors(headers: &mut HeaderMap, is_streaming: bool) {
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type, Authorization, Accept, Cache-Control"),
    );
    if is_streaming {
        headers.insert(
            "access-control-expose-headers",
            HeaderValue::from_static("Content-Type, Cache-Control"),
        );
    }
}

/// Metadata response headers emitted when token parsing succeeds
/// (spec §6).
pub fn apply_metadata_headers(headers: &mut HeaderMap, meta: &super::types::ResponseMetadata) {
    if let Some(v) = meta.input_tokens {
        insert_i64(headers, "x-llm-input-tokens", v);
    }
    if let Some(v) = meta.output_tokens {
        insert_i64(headers, "x-llm-output-tokens", v);
    }
    if let Some(v) = meta.total_tokens {
        insert_i64(headers, "x-llm-total-tokens", v);
    }
    if let Some(v) = meta.thought_tokens {
        insert_i64(headers, "x-llm-thought-tokens", v);
    }
    if let Ok(v) = HeaderValue::from_str(&meta.provider) {
        headers.insert("x-llm-provider", v);
    }
    if let Some(model) = &meta.model {
        if let Ok(v) = HeaderValue::from_str(model) {
            headers.insert("x-llm-model", v);
        }
    }
    if let Some(id) = &meta.request_id {
        if !id.is_empty() {
            if let Ok(v) = HeaderValue::from_str(id) {
                headers.insert("x-llm-request-id", v);
            }
        }
    }
}

fn insert_i64(headers: &mut HeaderMap, name: &'static str, value: i64) {
    if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_responses_never_carry_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CONTENT_LENGTH, HeaderValue::from_static("1234"));
        apply_streaming_hygiene(&mut headers);
        assert!(!headers.contains_key(axum::http::header::CONTENT_LENGTH));
    }

    #[test]
    fn cors_present_and_streaming_adds_expose_headers() {
        let mut headers = HeaderMap::new();
        apply_cors(&mut headers, true);
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert!(headers.contains_key("access-control-expose-headers"));
    }

    #[test]
    fn hop_by_hop_headers_are_not_forwarded() {
        let mut from = HeaderMap::new();
        from.insert("connection", HeaderValue::from_static("keep-alive"));
        from.insert("content-type", HeaderValue::from_static("application/json"));
        let mut to = HeaderMap::new();
        copy_forward_headers(&from, &mut to);
        assert!(!to.contains_key("connection"));
        assert!(to.contains_key("content-type"));
    }
}
