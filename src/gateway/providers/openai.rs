//! OpenAI-style provider: `/v1/chat/completions`, `/v1/completions`,
//! `/v1/responses`. Two response shapes are parsed — Chat/Completions and
//! the newer Responses API.

use super::{
    decode_json_body, sse_data_events, KeyPlacement, MetadataParseError, ProviderHandler,
    RequestSignal, StreamParse,
};
use crate::gateway::types::{BodySample, ResponseMetadata};

pub struct OpenAiHandler {
    base_url: String,
}

impl OpenAiHandler {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

fn body_sample_json(sample: Option<&BodySample>) -> Option<serde_json::Value> {
    serde_json::from_slice(sample?.bytes.as_ref()).ok()
}

fn accepts_sse(signal: &RequestSignal) -> bool {
    signal
        .headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

impl ProviderHandler for OpenAiHandler {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_placement(&self) -> KeyPlacement {
        KeyPlacement::AuthorizationBearer
    }

    fn is_streaming_request(&self, signal: &RequestSignal) -> bool {
        if accepts_sse(signal) {
            return true;
        }
        body_sample_json(signal.sample)
            .and_then(|v| v.get("stream").and_then(|s| s.as_bool()))
            .unwrap_or(false)
    }

    fn user_id_from_request(&self, sample: Option<&BodySample>) -> Option<String> {
        body_sample_json(sample)?
            .get("user")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn parse_non_streaming(&self, bytes: &[u8]) -> Result<ResponseMetadata, MetadataParseError> {
        let json = decode_json_body(bytes).map_err(|e| MetadataParseError {
            provider: "openai",
            reason: e.to_string(),
        })?;
        parse_value(&json).ok_or_else(|| MetadataParseError {
            provider: "openai",
            reason: "no usage information".into(),
        })
    }

    fn parse_streaming(&self, buffer: &[u8]) -> StreamParse {
        let text = String::from_utf8_lossy(buffer);
        let terminal = text.lines().any(|l| l.trim() == "data: [DONE]" || l.trim().strip_prefix("data:").map(|d| d.trim() == "[DONE]").unwrap_or(false));

        let mut meta = ResponseMetadata::new("openai");
        meta.is_streaming = true;
        let mut found_any = false;

        for event in sse_data_events(buffer) {
            if let Some(m) = parse_value(&event) {
                found_any = true;
                meta.model = m.model.or(meta.model.take());
                meta.request_id = m.request_id.or(meta.request_id.take());
                meta.finish_reason = m.finish_reason.or(meta.finish_reason.take());
                meta.input_tokens = m.input_tokens.or(meta.input_tokens);
                meta.output_tokens = m.output_tokens.or(meta.output_tokens);
                meta.thought_tokens = m.thought_tokens.or(meta.thought_tokens);
                meta.total_tokens = m.total_tokens.or(meta.total_tokens);
            } else if let Some(model) = event.get("model").and_then(|v| v.as_str()) {
                meta.model = Some(model.to_string());
                found_any = true;
            }
            if let Some(id) = event.get("id").and_then(|v| v.as_str()) {
                meta.request_id = Some(id.to_string());
            }
        }

        if !found_any && meta.request_id.is_none() {
            return StreamParse::Empty;
        }
        if terminal && meta.has_usage() {
            StreamParse::Final(meta)
        } else {
            StreamParse::Partial(meta)
        }
    }
}

/// Try both the Chat/Completions and Responses API shapes against a single
/// JSON value (works for a whole non-streaming body or a single SSE
/// event's payload).
fn parse_value(json: &serde_json::Value) -> Option<ResponseMetadata> {
    let mut meta = ResponseMetadata::new("openai");

    meta.model = json.get("model").and_then(|v| v.as_str()).map(String::from);
    meta.request_id = json.get("id").and_then(|v| v.as_str()).map(String::from);

    if let Some(choices) = json.get("choices").and_then(|v| v.as_array()) {
        if let Some(reason) = choices
            .iter()
            .find_map(|c| c.get("finish_reason").and_then(|v| v.as_str()))
        {
            meta.finish_reason = Some(reason.to_string());
        }
    }

    // Responses API: top-level or nested under "response".
    let usage_holder = json.get("response").unwrap_or(json);
    if let Some(status) = usage_holder.get("status").and_then(|v| v.as_str()) {
        meta.finish_reason.get_or_insert_with(|| status.to_string());
    }
    if meta.model.is_none() {
        meta.model = usage_holder
            .get("model")
            .and_then(|v| v.as_str())
            .map(String::from);
    }
    if meta.request_id.is_none() {
        meta.request_id = usage_holder
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from);
    }

    let usage = usage_holder.get("usage")?;
    let mut populated = false;

    if let Some(pt) = usage.get("prompt_tokens").and_then(|v| v.as_i64()) {
        meta.input_tokens = Some(pt);
        populated = true;
    }
    if let Some(ct) = usage.get("completion_tokens").and_then(|v| v.as_i64()) {
        meta.output_tokens = Some(ct);
        populated = true;
    }
    if let Some(it) = usage.get("input_tokens").and_then(|v| v.as_i64()) {
        meta.input_tokens = Some(it);
        populated = true;
    }
    if let Some(ot) = usage.get("output_tokens").and_then(|v| v.as_i64()) {
        meta.output_tokens = Some(ot);
        populated = true;
    }
    if let Some(tt) = usage.get("total_tokens").and_then(|v| v.as_i64()) {
        meta.total_tokens = Some(tt);
        populated = true;
    }
    if let Some(rt) = usage
        .get("output_tokens_details")
        .and_then(|d| d.get("reasoning_tokens"))
        .and_then(|v| v.as_i64())
    {
        meta.thought_tokens = Some(rt);
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

    #[test]
    fn parses_chat_completions_non_streaming_usage() {
        let handler = OpenAiHandler::new("https://api.openai.com".into());
        let body = br#"{"id":"chatcmpl-1","model":"gpt-4o","choices":[{"finish_reason":"stop"}],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let meta = handler.parse_non_streaming(body).unwrap();
        assert_eq!(meta.input_tokens, Some(10));
        assert_eq!(meta.output_tokens, Some(5));
        assert_eq!(meta.total_tokens, Some(15));
        assert_eq!(meta.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parses_responses_api_streaming_with_reasoning_tokens() {
        let handler = OpenAiHandler::new("https://api.openai.com".into());
        let transcript = concat!(
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\n\n",
            "data: {\"response\":{\"id\":\"resp_1\",\"usage\":{\"input_tokens\":14,\"output_tokens\":9,\"total_tokens\":23,\"output_tokens_details\":{\"reasoning_tokens\":5}}}}\n\n",
            "data: [DONE]\n\n",
        );
        let result = handler.parse_streaming(transcript.as_bytes());
        match result {
            StreamParse::Final(meta) => {
                assert_eq!(meta.input_tokens, Some(14));
                assert_eq!(meta.output_tokens, Some(9));
                assert_eq!(meta.total_tokens, Some(23));
                assert_eq!(meta.thought_tokens, Some(5));
            }
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[test]
    fn reparsing_the_same_transcript_does_not_double_count() {
        let handler = OpenAiHandler::new("https://api.openai.com".into());
        let transcript = concat!(
            "data: {\"choices\":[{\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n\n",
            "data: [DONE]\n\n",
        );
        let first = handler.parse_streaming(transcript.as_bytes());
        let second = handler.parse_streaming(transcript.as_bytes());
        let extract = |r: StreamParse| match r {
            StreamParse::Final(m) | StreamParse::Partial(m) => m.total_tokens,
            StreamParse::Empty => None,
        };
        assert_eq!(extract(first), extract(second));
        assert_eq!(extract(handler.parse_streaming(transcript.as_bytes())), Some(15));
    }

    #[test]
    fn no_usage_information_is_a_parse_error() {
        let handler = OpenAiHandler::new("https://api.openai.com".into());
        let body = br#"{"id":"chatcmpl-1","model":"gpt-4o","choices":[{"finish_reason":"stop"}]}"#;
        assert!(handler.parse_non_streaming(body).is_err());
    }
}
