//! Identity Resolver (C6): derives the user id used for rate-limit scoping
//! and logging, and the client IP used for logging, per the fixed priority
//! chains in spec §4.6.

use axum::http::{HeaderMap, Uri};

use super::providers::ProviderHandler;
use super::types::BodySample;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn query_param<'a>(uri: &'a Uri, name: &str) -> Option<&'a str> {
    uri.query()?.split('&').find_map(|kv| {
        let mut parts = kv.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next().unwrap_or("");
        (key == name).then_some(value)
    })
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")?
        .split(',')
        .next()
        .map(|s| s.trim().to_string())
}

/// Priority chain from spec §4.6:
/// 1. user id bound by the URL rewriter (C5)
/// 2. `X-User-ID` header
/// 3. provider-specific body extraction
/// 4. `llm_user_id` query parameter
/// 5. `token:{first 8 chars}` of a bearer token
/// 6. `ip:{value}` from X-Forwarded-For, then X-Real-IP, then peer address
pub fn resolve_user_id(
    bound_user_id: Option<&str>,
    headers: &HeaderMap,
    uri: &Uri,
    sample: Option<&BodySample>,
    handler: &dyn ProviderHandler,
    peer_addr: Option<&str>,
) -> String {
    if let Some(id) = bound_user_id {
        if !id.is_empty() {
            return id.to_string();
        }
    }

    if let Some(id) = header_str(headers, "x-user-id") {
        if !id.is_empty() {
            return id.to_string();
        }
    }

    if let Some(id) = handler.user_id_from_request(sample) {
        if !id.is_empty() {
            return id;
        }
    }

    if let Some(id) = query_param(uri, "llm_user_id") {
        if !id.is_empty() {
            return id.to_string();
        }
    }

    if let Some(bearer) = header_str(headers, "authorization").and_then(|v| v.strip_prefix("Bearer ")) {
        let prefix: String = bearer.chars().take(8).collect();
        if !prefix.is_empty() {
            return format!("token:{prefix}");
        }
    }

    if let Some(ip) = first_forwarded_for(headers) {
        return format!("ip:{ip}");
    }
    if let Some(ip) = header_str(headers, "x-real-ip") {
        return format!("ip:{ip}");
    }
    format!("ip:{}", peer_addr.unwrap_or("unknown"))
}

/// Client IP used purely for logging — X-Forwarded-For (first element),
/// then X-Real-IP, then the peer address.
pub fn client_ip(headers: &HeaderMap, peer_addr: Option<&str>) -> String {
    if let Some(ip) = first_forwarded_for(headers) {
        return ip;
    }
    if let Some(ip) = header_str(headers, "x-real-ip") {
        return ip.to_string();
    }
    peer_addr.unwrap_or("unknown").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::providers::anthropic::AnthropicHandler;
    use axum::http::HeaderValue;

    fn handler() -> AnthropicHandler {
        AnthropicHandler::new("https://api.anthropic.com".into())
    }

    #[test]
    fn bound_user_id_wins_over_everything() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("header-user"));
        let uri: Uri = "/anthropic/v1/messages".parse().unwrap();
        let id = resolve_user_id(Some("bound-user"), &headers, &uri, None, &handler(), None);
        assert_eq!(id, "bound-user");
    }

    #[test]
    fn falls_back_to_header_then_query_then_bearer_then_ip() {
        let h = handler();
        let uri_with_query: Uri = "/anthropic/v1/messages?llm_user_id=query-user"
            .parse()
            .unwrap();

        // Header wins over query.
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("header-user"));
        assert_eq!(
            resolve_user_id(None, &headers, &uri_with_query, None, &h, None),
            "header-user"
        );

        // No header, no body sample -> query wins.
        let empty_headers = HeaderMap::new();
        assert_eq!(
            resolve_user_id(None, &empty_headers, &uri_with_query, None, &h, None),
            "query-user"
        );

        // No header, no query, bearer token present.
        let uri_plain: Uri = "/anthropic/v1/messages".parse().unwrap();
        let mut bearer_headers = HeaderMap::new();
        bearer_headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abcdefghijkl"),
        );
        assert_eq!(
            resolve_user_id(None, &bearer_headers, &uri_plain, None, &h, None),
            "token:abcdefgh"
        );

        // Nothing at all -> falls back to peer address.
        assert_eq!(
            resolve_user_id(None, &empty_headers, &uri_plain, None, &h, Some("10.0.0.5")),
            "ip:10.0.0.5"
        );
    }

    #[test]
    fn client_ip_prefers_forwarded_for_first_element() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some("10.0.0.9")), "203.0.113.5");
    }
}
