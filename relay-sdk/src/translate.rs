//! Protocol Translator (C9, §4.9): Anthropic Messages API ⇄ canonical
//! OpenAI-shaped request/response, plus Anthropic SSE event framing for
//! streaming responses. The OpenAI→Anthropic direction only; translating an
//! Anthropic request into OpenAI's shape is in scope, the reverse response
//! direction is not (an Anthropic client only ever receives Anthropic SSE).

use crate::models::{ChatRequest, ChatResponse, Message, Role, StreamChunk};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Anthropic's `messages[].content` request shape: either a plain string or
/// an array of typed segments. Only the `text` segment type is translated;
/// anything else is dropped (images/tool_use are out of scope here).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Segments(Vec<AnthropicSegment>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicSegment {
    #[serde(rename = "type")]
    pub segment_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessageIn {
    pub role: String,
    pub content: AnthropicContent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicRequestIn {
    pub model: String,
    pub messages: Vec<AnthropicMessageIn>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: Option<bool>,
}

/// Joins an Anthropic content-segment array with spaces, matching the
/// boundary's concatenation rule (§4.9).
fn flatten_content(content: AnthropicContent) -> String {
    match content {
        AnthropicContent::Text(s) => s,
        AnthropicContent::Segments(segments) => segments
            .into_iter()
            .filter(|s| s.segment_type == "text")
            .map(|s| s.text)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Anthropic Messages request → canonical OpenAI-shaped `ChatRequest`.
pub fn anthropic_request_to_chat_request(input: AnthropicRequestIn) -> ChatRequest {
    let mut messages = Vec::with_capacity(input.messages.len() + 1);
    if let Some(system) = input.system.filter(|s| !s.is_empty()) {
        messages.push(Message::system(system));
    }
    for m in input.messages {
        let content = flatten_content(m.content);
        let role = match m.role.as_str() {
            "assistant" => Role::Assistant,
            _ => Role::User,
        };
        messages.push(Message {
            role,
            content,
            name: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }

    ChatRequest {
        model: input.model,
        messages,
        temperature: input.temperature,
        max_tokens: input.max_tokens,
        stream: input.stream,
        ..Default::default()
    }
}

/// Canonical `ChatResponse` → Anthropic Messages response body, wrapping
/// the plain text content as a single-element content-segment array.
pub fn chat_response_to_anthropic(response: &ChatResponse) -> serde_json::Value {
    let choice = response.choices.first();
    let text = choice.map(|c| c.message.content.clone()).unwrap_or_default();
    let stop_reason = choice.and_then(|c| c.finish_reason.clone());

    json!({
        "id": response.id,
        "type": "message",
        "role": "assistant",
        "model": response.model,
        "content": [{"type": "text", "text": text}],
        "stop_reason": stop_reason,
        "usage": {
            "input_tokens": response.usage.map(|u| u.prompt_tokens).unwrap_or(0),
            "output_tokens": response.usage.map(|u| u.completion_tokens).unwrap_or(0),
        },
    })
}

/// Drives the exact six-event Anthropic SSE sequence (§4.9) from a stream of
/// canonical `StreamChunk`s. Tracks whether `content_block_start` has fired
/// yet so it's emitted exactly once, on the first non-empty delta.
pub struct AnthropicSseEncoder {
    message_id: String,
    model: String,
    started: bool,
    block_opened: bool,
}

impl AnthropicSseEncoder {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            started: false,
            block_opened: false,
        }
    }

    /// Frames a chunk as zero-or-more `event: ...\ndata: ...\n\n` blocks,
    /// emitting `message_start`/`content_block_start` lazily on first use.
    pub fn encode_chunk(&mut self, chunk: &StreamChunk) -> String {
        let mut out = String::new();
        if !self.started {
            out.push_str(&sse_event(
                "message_start",
                &json!({
                    "type": "message_start",
                    "message": {
                        "id": self.message_id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                    }
                }),
            ));
            self.started = true;
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                if !self.block_opened {
                    out.push_str(&sse_event(
                        "content_block_start",
                        &json!({
                            "type": "content_block_start",
                            "index": 0,
                            "content_block": {"type": "text", "text": ""}
                        }),
                    ));
                    self.block_opened = true;
                }
                out.push_str(&sse_event(
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": 0,
                        "delta": {"type": "text_delta", "text": content}
                    }),
                ));
            }
        }

        if choice.finish_reason.is_some() {
            out.push_str(&self.finish());
        }

        out
    }

    /// Emits the closing `content_block_stop` / `message_delta` /
    /// `message_stop` triple, each exactly once. `stop_reason` is always
    /// `"end_turn"` here — Anthropic clients never see the raw upstream
    /// (OpenAI-shaped) finish reason.
    fn finish(&mut self) -> String {
        let mut out = String::new();
        if self.block_opened {
            out.push_str(&sse_event(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": 0}),
            ));
        }
        out.push_str(&sse_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn"},
            }),
        ));
        out.push_str(&sse_event("message_stop", &json!({"type": "message_stop"})));
        out
    }

    /// Frames an upstream failure as Anthropic's `event: error` block.
    pub fn encode_error(&self, message: &str) -> String {
        sse_event(
            "error",
            &json!({
                "type": "error",
                "error": {"type": "api_error", "message": message}
            }),
        )
    }
}

fn sse_event(event: &str, data: &serde_json::Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Delta, StreamChoice};

    #[test]
    fn text_segments_join_with_spaces() {
        let content = AnthropicContent::Segments(vec![
            AnthropicSegment { segment_type: "text".to_string(), text: "hello".to_string() },
            AnthropicSegment { segment_type: "text".to_string(), text: "world".to_string() },
        ]);
        assert_eq!(flatten_content(content), "hello world");
    }

    #[test]
    fn plain_string_content_passes_through() {
        assert_eq!(flatten_content(AnthropicContent::Text("hi".to_string())), "hi");
    }

    #[test]
    fn response_wraps_text_as_single_segment() {
        let response = ChatResponse {
            id: "1".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "claude-3-5-sonnet".to_string(),
            choices: vec![crate::models::Choice {
                index: 0,
                message: Message::assistant("hi"),
                finish_reason: Some("stop".to_string()),
                logprobs: None,
            }],
            usage: None,
            system_fingerprint: None,
        };
        let value = chat_response_to_anthropic(&response);
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "hi");
    }

    fn delta_chunk(content: Option<&str>, finish_reason: Option<&str>) -> StreamChunk {
        StreamChunk {
            id: "1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "claude-3-5-sonnet".to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: content.map(str::to_string),
                    tool_calls: None,
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    #[test]
    fn encoder_emits_start_events_once_then_deltas_then_stop_sequence() {
        let mut encoder = AnthropicSseEncoder::new("msg_1", "claude-3-5-sonnet");

        let first = encoder.encode_chunk(&delta_chunk(Some("hi"), None));
        assert!(first.contains("message_start"));
        assert!(first.contains("content_block_start"));
        assert!(first.contains("content_block_delta"));

        let second = encoder.encode_chunk(&delta_chunk(Some(" there"), None));
        assert!(!second.contains("message_start"));
        assert!(!second.contains("content_block_start"));
        assert!(second.contains("content_block_delta"));

        let last = encoder.encode_chunk(&delta_chunk(None, Some("end_turn")));
        assert!(last.contains("content_block_stop"));
        assert!(last.contains("message_delta"));
        assert!(last.contains("message_stop"));
    }

    #[test]
    fn stop_reason_is_always_end_turn_regardless_of_upstream_value() {
        let mut encoder = AnthropicSseEncoder::new("msg_1", "claude-3-5-sonnet");
        encoder.encode_chunk(&delta_chunk(Some("hi"), None));
        let last = encoder.encode_chunk(&delta_chunk(None, Some("stop")));
        assert!(last.contains(r#""stop_reason":"end_turn""#));
        assert!(!last.contains(r#""stop_reason":"stop""#));
    }
}
