//! Anthropic-style provider: `/v1/messages`. Streaming usage is
//! event-tagged and incremental — `message_start` carries the initial
//! input/output counts, each `message_delta` carries an *incremental*
//! output_tokens delta that must be summed, `message_stop` closes.

use super::{
    decode_json_body, sse_data_events, KeyPlacement, MetadataParseError, ProviderHandler,
    RequestSignal, StreamParse,
};
use crate::gateway::types::{BodySample, ResponseMetadata};

pub struct AnthropicHandler {
    base_url: String,
}

impl AnthropicHandler {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

fn body_sample_json(sample: Option<&BodySample>) -> Option<serde_json::Value> {
    serde_json::from_slice(sample?.bytes.as_ref()).ok()
}

impl ProviderHandler for AnthropicHandler {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_placement(&self) -> KeyPlacement {
        KeyPlacement::AuthorizationBearer
    }

    fn is_streaming_request(&self, signal: &RequestSignal) -> bool {
        if signal
            .headers
            .get(axum::http::header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false)
        {
            return true;
        }
        body_sample_json(signal.sample)
            .and_then(|v| v.get("stream").and_then(|s| s.as_bool()))
            .unwrap_or(false)
    }

    fn user_id_from_request(&self, sample: Option<&BodySample>) -> Option<String> {
        body_sample_json(sample)?
            .get("metadata")
            .and_then(|m| m.get("user_id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    fn parse_non_streaming(&self, bytes: &[u8]) -> Result<ResponseMetadata, MetadataParseError> {
        let json = decode_json_body(bytes).map_err(|e| MetadataParseError {
            provider: "anthropic",
            reason: e.to_string(),
        })?;

        let usage = json.get("usage").ok_or_else(|| MetadataParseError {
            provider: "anthropic",
            reason: "no usage information".into(),
        })?;

        let input_tokens = usage.get("input_tokens").and_then(|v| v.as_i64());
        let output_tokens = usage.get("output_tokens").and_then(|v| v.as_i64());
        if input_tokens.is_none() && output_tokens.is_none() {
            return Err(MetadataParseError {
                provider: "anthropic",
                reason: "no usage information".into(),
            });
        }

        let mut meta = ResponseMetadata::new("anthropic");
        meta.model = json.get("model").and_then(|v| v.as_str()).map(String::from);
        meta.request_id = json.get("id").and_then(|v| v.as_str()).map(String::from);
        meta.finish_reason = json
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(String::from);
        meta.input_tokens = input_tokens;
        meta.output_tokens = output_tokens;
        meta.total_tokens = match (input_tokens, output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        };
        Ok(meta)
    }

    fn parse_streaming(&self, buffer: &[u8]) -> StreamParse {
        let mut meta = ResponseMetadata::new("anthropic");
        meta.is_streaming = true;

        let mut input_tokens: Option<i64> = None;
        let mut output_tokens: i64 = 0;
        let mut saw_output = false;
        let mut saw_stop = false;
        let mut found_any = false;

        for event in sse_data_events(buffer) {
            let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
            match event_type {
                "message_start" => {
                    if let Some(message) = event.get("message") {
                        meta.model = message
                            .get("model")
                            .and_then(|v| v.as_str())
                            .map(String::from);
                        meta.request_id =
                            message.get("id").and_then(|v| v.as_str()).map(String::from);
                        if let Some(usage) = message.get("usage") {
                            if let Some(i) = usage.get("input_tokens").and_then(|v| v.as_i64()) {
                                input_tokens = Some(i);
                                found_any = true;
                            }
                            if let Some(o) = usage.get("output_tokens").and_then(|v| v.as_i64()) {
                                output_tokens += o;
                                saw_output = true;
                                found_any = true;
                            }
                        }
                    }
                }
                "message_delta" => {
                    if let Some(delta) = event
                        .get("usage")
                        .and_then(|u| u.get("output_tokens"))
                        .and_then(|v| v.as_i64())
                    {
                        output_tokens += delta;
                        saw_output = true;
                        found_any = true;
                    }
                    if let Some(reason) = event
                        .get("delta")
                        .and_then(|d| d.get("stop_reason"))
                        .and_then(|v| v.as_str())
                    {
                        meta.finish_reason = Some(reason.to_string());
                    }
                }
                "message_stop" => {
                    saw_stop = true;
                }
                _ => {}
            }
        }

        meta.input_tokens = input_tokens;
        meta.output_tokens = if saw_output { Some(output_tokens) } else { None };
        meta.total_tokens = match (meta.input_tokens, meta.output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        };

        if !found_any {
            return StreamParse::Empty;
        }
        if saw_stop {
            StreamParse::Final(meta)
        } else {
            StreamParse::Partial(meta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_message_delta_output_tokens() {
        let handler = AnthropicHandler::new("https://api.anthropic.com".into());
        let transcript = concat!(
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-3\",\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":15}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let result = handler.parse_streaming(transcript.as_bytes());
        match result {
            StreamParse::Final(meta) => {
                assert_eq!(meta.input_tokens, Some(25));
                assert_eq!(meta.output_tokens, Some(16));
                assert_eq!(meta.total_tokens, Some(41));
                assert_eq!(meta.finish_reason.as_deref(), Some("end_turn"));
                assert!(meta.is_streaming);
            }
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[test]
    fn reparsing_does_not_double_accumulate() {
        let handler = AnthropicHandler::new("https://api.anthropic.com".into());
        let transcript = concat!(
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n",
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":15}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let extract = |r: StreamParse| match r {
            StreamParse::Final(m) | StreamParse::Partial(m) => m.output_tokens,
            StreamParse::Empty => None,
        };
        let first = extract(handler.parse_streaming(transcript.as_bytes()));
        let second = extract(handler.parse_streaming(transcript.as_bytes()));
        assert_eq!(first, Some(16));
        assert_eq!(first, second);
    }

    #[test]
    fn extracts_user_id_from_metadata() {
        let handler = AnthropicHandler::new("https://api.anthropic.com".into());
        let sample = BodySample {
            bytes: bytes::Bytes::from_static(br#"{"metadata":{"user_id":"abc123"}}"#),
            truncated: false,
        };
        assert_eq!(
            handler.user_id_from_request(Some(&sample)),
            Some("abc123".to_string())
        );
    }
}
