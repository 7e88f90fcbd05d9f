//! OpenAI-compatible streaming chat-completion adapter.
//!
//! Works with OpenAI, Azure-style gateways, Ollama, vLLM, and any other
//! endpoint that follows the chat completions contract.

use serde_json::Value;

use pal_domain::config::LlmConfig;
use pal_domain::conversation::Role;
use pal_domain::error::{Error, Result};
use pal_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::sse::{from_reqwest, into_event_stream};
use crate::traits::{CompletionProvider, CompletionRequest, PromptMessage};

pub struct ChatCompletionsProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl ChatCompletionsProvider {
    /// Build the adapter from config plus the resolved API key.
    /// `overall_timeout_secs` caps the whole streamed request.
    pub fn new(cfg: &LlmConfig, api_key: String, overall_timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(overall_timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: "openai-compat".to_string(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            client,
        })
    }

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(max) = req.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature.or(self.temperature) {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

fn msg_to_wire(msg: &PromptMessage) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    serde_json::json!({ "role": role, "content": msg.content })
}

/// Parse one streamed chunk payload into events.
///
/// Deltas arrive as `choices[0].delta.content`; the final chunk (with
/// `stream_options.include_usage`) carries `usage` and an empty choice
/// list; `[DONE]` terminates the stream.
fn parse_chunk(payload: &str) -> Vec<Result<StreamEvent>> {
    if payload == "[DONE]" {
        return Vec::new();
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            return vec![Err(Error::Http(format!(
                "malformed completion chunk: {e}"
            )))]
        }
    };

    let mut events = Vec::new();

    if let Some(text) = value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_string(),
            }));
        }
    }

    if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
        let finish_reason = value
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .map(String::from);
        events.push(Ok(StreamEvent::Done {
            usage: Some(Usage {
                input_tokens: usage
                    .get("prompt_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
                output_tokens: usage
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32,
            }),
            finish_reason,
        }));
    }

    events
}

#[async_trait::async_trait]
impl CompletionProvider for ChatCompletionsProvider {
    async fn stream(
        &self,
        req: CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "completion request rejected");
            return Err(Error::LlmUnavailable(format!(
                "completion endpoint returned {status}: {detail}"
            )));
        }

        Ok(into_event_stream(response, parse_chunk))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_chunk_becomes_token() {
        let events =
            parse_chunk(r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#);
        assert_eq!(events.len(), 1);
        assert!(
            matches!(&events[0], Ok(StreamEvent::Token { text }) if text == "Hel")
        );
    }

    #[test]
    fn usage_chunk_becomes_done() {
        let events = parse_chunk(
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":34}}"#,
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            Ok(StreamEvent::Done { usage, .. }) => {
                let usage = usage.expect("usage present");
                assert_eq!(usage.input_tokens, 12);
                assert_eq!(usage.output_tokens, 34);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_produces_nothing() {
        assert!(parse_chunk("[DONE]").is_empty());
    }

    #[test]
    fn malformed_chunk_is_an_error() {
        let events = parse_chunk("{not json");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }

    #[test]
    fn role_serialization_matches_wire_names() {
        let wire = msg_to_wire(&PromptMessage::system("s"));
        assert_eq!(wire["role"], "system");
        let wire = msg_to_wire(&PromptMessage::assistant("a"));
        assert_eq!(wire["role"], "assistant");
    }
}
