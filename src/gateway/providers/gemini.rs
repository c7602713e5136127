//! Gemini-style provider. Hard constraint from spec §4.2: streaming
//! detection MUST NOT read the request body — uploads can run to hundreds
//! of megabytes, so detection is header/URL-only (`alt=sse` query param or
//! the `:streamGenerateContent` URL suffix). Identity extraction always
//! returns empty for the same reason.

use super::{
    decode_json_body, sse_data_events, KeyPlacement, MetadataParseError, ProviderHandler,
    RequestSignal, StreamParse,
};
use crate::gateway::types::{BodySample, ResponseMetadata};

pub struct GeminiHandler {
    base_url: String,
}

impl GeminiHandler {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

impl ProviderHandler for GeminiHandler {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_placement(&self) -> KeyPlacement {
        KeyPlacement::GoogApiKeyHeader
    }

    /// Never inspects `signal.sample` — detection is header/URL-only,
    /// satisfying the zero-body-read hard constraint regardless of upload
    /// size.
    fn is_streaming_request(&self, signal: &RequestSignal) -> bool {
        let path_and_query = signal
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("");
        if path_and_query.contains(":streamGenerateContent") {
            return true;
        }
        signal
            .uri
            .query()
            .map(|q| q.split('&').any(|kv| kv == "alt=sse"))
            .unwrap_or(false)
    }

    /// Always empty — Gemini identity extraction never samples the body.
    fn user_id_from_request(&self, _sample: Option<&BodySample>) -> Option<String> {
        None
    }

    fn parse_non_streaming(&self, bytes: &[u8]) -> Result<ResponseMetadata, MetadataParseError> {
        let json = decode_json_body(bytes).map_err(|e| MetadataParseError {
            provider: "gemini",
            reason: e.to_string(),
        })?;
        parse_value(&json).ok_or_else(|| MetadataParseError {
            provider: "gemini",
            reason: "no usage information".into(),
        })
    }

    fn parse_streaming(&self, buffer: &[u8]) -> StreamParse {
        let mut meta = ResponseMetadata::new("gemini");
        meta.is_streaming = true;
        let mut found_any = false;

        for event in sse_data_events(buffer) {
            if let Some(m) = parse_value(&event) {
                found_any = true;
                meta.model = m.model.or(meta.model.take());
                meta.finish_reason = m.finish_reason.or(meta.finish_reason.take());
                meta.input_tokens = m.input_tokens.or(meta.input_tokens);
                meta.output_tokens = m.output_tokens.or(meta.output_tokens);
                meta.thought_tokens = m.thought_tokens.or(meta.thought_tokens);
                meta.total_tokens = m.total_tokens.or(meta.total_tokens);
            }
        }

        if !found_any {
            return StreamParse::Empty;
        }
        // Gemini's SSE stream has no `[DONE]`-equivalent terminator; the
        // caller decides finality when the upstream connection closes.
        StreamParse::Partial(meta)
    }
}

fn parse_value(json: &serde_json::Value) -> Option<ResponseMetadata> {
    let mut meta = ResponseMetadata::new("gemini");

    meta.model = json
        .get("modelVersion")
        .and_then(|v| v.as_str())
        .map(|s| s.strip_prefix("models/").unwrap_or(s).to_string());

    if let Some(candidates) = json.get("candidates").and_then(|v| v.as_array()) {
        if let Some(reason) = candidates
            .iter()
            .find_map(|c| c.get("finishReason").and_then(|v| v.as_str()))
        {
            meta.finish_reason = Some(reason.to_string());
        }
    }

    let usage = json.get("usageMetadata")?;
    let mut populated = false;

    if let Some(v) = usage.get("promptTokenCount").and_then(|v| v.as_i64()) {
        meta.input_tokens = Some(v);
        populated = true;
    }
    if let Some(v) = usage.get("candidatesTokenCount").and_then(|v| v.as_i64()) {
        meta.output_tokens = Some(v);
        populated = true;
    }
    if let Some(v) = usage.get("totalTokenCount").and_then(|v| v.as_i64()) {
        meta.total_tokens = Some(v);
        populated = true;
    }
    if let Some(v) = usage.get("thoughtsTokenCount").and_then(|v| v.as_i64()) {
        meta.thought_tokens = Some(v);
        populated = true;
    }

    if !populated {
        return None;
    }
    Some(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method, Uri};

    #[test]
    fn streaming_detected_by_url_suffix_without_touching_body() {
        let handler = GeminiHandler::new("https://generativelanguage.googleapis.com".into());
        let uri: Uri = "/gemini/v1beta/models/gemini-pro:streamGenerateContent"
            .parse()
            .unwrap();
        let headers = HeaderMap::new();
        let method = Method::POST;
        let signal = RequestSignal {
            method: &method,
            uri: &uri,
            headers: &headers,
            sample: None,
        };
        assert!(handler.is_streaming_request(&signal));
    }

    #[test]
    fn streaming_detected_by_alt_sse_query_param() {
        let handler = GeminiHandler::new("https://generativelanguage.googleapis.com".into());
        let uri: Uri = "/gemini/v1beta/models/gemini-pro:generateContent?alt=sse"
            .parse()
            .unwrap();
        let headers = HeaderMap::new();
        let method = Method::POST;
        let signal = RequestSignal {
            method: &method,
            uri: &uri,
            headers: &headers,
            sample: None,
        };
        assert!(handler.is_streaming_request(&signal));
    }

    #[test]
    fn non_streaming_request_never_reads_sample_and_reports_false() {
        let handler = GeminiHandler::new("https://generativelanguage.googleapis.com".into());
        let uri: Uri = "/gemini/v1beta/models/gemini-pro:generateContent"
            .parse()
            .unwrap();
        let headers = HeaderMap::new();
        let method = Method::POST;
        let signal = RequestSignal {
            method: &method,
            uri: &uri,
            headers: &headers,
            sample: None,
        };
        assert!(!handler.is_streaming_request(&signal));
    }

    #[test]
    fn strips_models_prefix_from_model_version() {
        let handler = GeminiHandler::new("https://generativelanguage.googleapis.com".into());
        let body = br#"{"modelVersion":"models/gemini-1.5-pro","usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":3,"totalTokenCount":10,"thoughtsTokenCount":2}}"#;
        let meta = handler.parse_non_streaming(body).unwrap();
        assert_eq!(meta.model.as_deref(), Some("gemini-1.5-pro"));
        assert_eq!(meta.input_tokens, Some(7));
        assert_eq!(meta.output_tokens, Some(3));
        assert_eq!(meta.total_tokens, Some(10));
        assert_eq!(meta.thought_tokens, Some(2));
    }

    #[test]
    fn identity_extraction_is_always_empty() {
        let handler = GeminiHandler::new("https://generativelanguage.googleapis.com".into());
        let sample = BodySample {
            bytes: bytes::Bytes::from_static(br#"{"user_id":"should-be-ignored"}"#),
            truncated: false,
        };
        assert_eq!(handler.user_id_from_request(Some(&sample)), None);
    }
}
