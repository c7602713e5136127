//! Body-Sampling Helper (C3): bounded, restartable inspection of request
//! bodies, never reading more than `max_sample_bytes` and never touching
//! Gemini's media uploads at all.

use axum::http::HeaderMap;

use super::types::BodySample;

/// Never sample unless the content type is `application/json`.
fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.split(';').next().unwrap_or("").trim() == "application/json")
        .unwrap_or(false)
}

/// Sample `body` if the content type is JSON and its length doesn't exceed
/// `limit_bytes`. Returns `None` when sampling should be skipped — callers
/// fall back to header-only detection, per spec §7 BodySampleError
/// semantics (never fatal). Per spec §4.3, a body over `limit_bytes` is
/// never sampled at all, not truncated to a prefix.
pub fn sample(headers: &HeaderMap, body: &bytes::Bytes, limit_bytes: usize) -> Option<BodySample> {
    if !is_json_content_type(headers) {
        return None;
    }
    if body.len() > limit_bytes {
        return None;
    }
    Some(BodySample {
        bytes: body.clone(),
        truncated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_ct(ct: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_str(ct).unwrap(),
        );
        h
    }

    #[test]
    fn skips_non_json_bodies() {
        let headers = headers_with_ct("application/octet-stream");
        let body = bytes::Bytes::from_static(b"{}");
        assert!(sample(&headers, &body, 1024).is_none());
    }

    #[test]
    fn full_sample_when_within_limit() {
        let headers = headers_with_ct("application/json");
        let body = bytes::Bytes::from_static(b"{\"model\":\"gpt-4o\"}");
        let s = sample(&headers, &body, 1024).unwrap();
        assert!(!s.truncated);
        assert_eq!(s.bytes, body);
    }

    #[test]
    fn skips_oversized_bodies_instead_of_truncating() {
        let headers = headers_with_ct("application/json; charset=utf-8");
        let body = bytes::Bytes::from(vec![b'a'; 100]);
        assert!(sample(&headers, &body, 16).is_none());
        // the body itself is untouched — callers still read it in full.
        assert_eq!(body.len(), 100);
    }

    #[test]
    fn sampling_then_reading_in_full_reproduces_original_bytes() {
        let headers = headers_with_ct("application/json");
        let body = bytes::Bytes::from_static(b"{\"a\":1,\"b\":2}");
        let s = sample(&headers, &body, 1024).unwrap();
        assert!(!s.truncated);
        // Downstream consumer still reads the original body in full —
        // the sampler never mutates `body` itself.
        assert_eq!(body.as_ref(), b"{\"a\":1,\"b\":2}" as &[u8]);
        assert_eq!(s.restart().as_ref(), body.as_ref());
    }
}
