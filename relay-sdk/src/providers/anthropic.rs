//! Adapter for the native Anthropic Messages API.
//!
//! Anthropic's typed SSE event stream (`message_start`, `content_block_delta`,
//! …) is normalized into OpenAI-shaped `StreamChunk`s here, at the adapter
//! boundary, so the Strategy Engine and HTTP Facade never see Anthropic's
//! wire format directly (§4.4).

use crate::domain::{HealthStatus, ProviderType};
use crate::error::AdapterError;
use crate::models::{ChatRequest, ChatResponse, Choice, Message, Role, StreamChunk, Usage};
use async_stream::stream;
use serde::{Deserialize, Serialize};

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use super::{Adapter, AdapterConfig, StreamResult};

pub struct AnthropicAdapter {
    http: HttpProviderClient,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    content: Vec<AnthropicContent>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let mut headers = config.headers.clone();
        headers.insert("anthropic-version".to_string(), "2023-06-01".to_string());
        let http = HttpProviderClient::new(
            config.timeout,
            Some(config.base_url),
            "https://api.anthropic.com",
            &headers,
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: config.api_key,
            },
        )?;
        Ok(Self { http })
    }

    fn convert_messages(messages: Vec<Message>) -> Vec<AnthropicMessage> {
        let mut out = Vec::new();
        let mut system_content = String::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    if !msg.content.is_empty() {
                        if !system_content.is_empty() {
                            system_content.push('\n');
                        }
                        system_content.push_str(&msg.content);
                    }
                }
                Role::User => {
                    if !system_content.is_empty() && out.is_empty() {
                        out.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: format!("{system_content}\n\n{}", msg.content),
                        });
                        system_content.clear();
                    } else {
                        out.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: msg.content,
                        });
                    }
                }
                Role::Assistant => out.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: msg.content,
                }),
                Role::Tool => continue,
            }
        }

        if !system_content.is_empty() && out.is_empty() {
            out.push(AnthropicMessage {
                role: "user".to_string(),
                content: system_content,
            });
        }

        out
    }

    fn convert_response(response: AnthropicResponse) -> ChatResponse {
        let content = response
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        ChatResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: response.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason: response.stop_reason,
                logprobs: None,
            }],
            usage: Some(Usage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response.usage.input_tokens + response.usage.output_tokens,
            }),
            system_fingerprint: None,
        }
    }
}

#[async_trait::async_trait]
impl Adapter for AnthropicAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        let anthropic_request = AnthropicRequest {
            model: request.model,
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages: Self::convert_messages(request.messages),
            temperature: request.temperature,
            stream: Some(false),
        };

        let response: AnthropicResponse =
            self.http.post_json("/v1/messages", &anthropic_request).await?;
        Ok(Self::convert_response(response))
    }

    async fn stream_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<StreamResult, AdapterError> {
        let model = request.model.clone();
        let anthropic_request = AnthropicRequest {
            model: request.model,
            max_tokens: request.max_tokens.unwrap_or(4096),
            messages: Self::convert_messages(request.messages),
            temperature: request.temperature,
            stream: Some(true),
        };

        let response = self
            .http
            .post_json_raw("/v1/messages", &anthropic_request)
            .await?;
        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let stream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();
            let message_id = uuid::Uuid::new_v4().to_string();

            while let Some(chunk_result) = futures::StreamExt::next(&mut bytes_stream).await {
                match chunk_result {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();

                            let Some(json_str) = line.strip_prefix("data: ") else { continue };

                            match serde_json::from_str::<serde_json::Value>(json_str) {
                                Ok(event) => {
                                    let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
                                    match event_type {
                                        "content_block_delta" => {
                                            if let Some(text) = event.get("delta").and_then(|d| d.get("text")).and_then(|t| t.as_str()) {
                                                yield Ok(StreamChunk {
                                                    id: message_id.clone(),
                                                    object: "chat.completion.chunk".to_string(),
                                                    created: chrono::Utc::now().timestamp() as u64,
                                                    model: model.clone(),
                                                    choices: vec![crate::models::StreamChoice {
                                                        index: 0,
                                                        delta: crate::models::Delta {
                                                            role: None,
                                                            content: Some(text.to_string()),
                                                            tool_calls: None,
                                                        },
                                                        finish_reason: None,
                                                    }],
                                                });
                                            }
                                        }
                                        "message_delta" => {
                                            let finish_reason = event
                                                .get("delta")
                                                .and_then(|d| d.get("stop_reason"))
                                                .and_then(|r| r.as_str())
                                                .map(|s| s.to_string());
                                            if finish_reason.is_some() {
                                                yield Ok(StreamChunk {
                                                    id: message_id.clone(),
                                                    object: "chat.completion.chunk".to_string(),
                                                    created: chrono::Utc::now().timestamp() as u64,
                                                    model: model.clone(),
                                                    choices: vec![crate::models::StreamChoice {
                                                        index: 0,
                                                        delta: crate::models::Delta::default(),
                                                        finish_reason,
                                                    }],
                                                });
                                            }
                                        }
                                        "message_stop" => return,
                                        "error" => {
                                            let message = event.get("error")
                                                .and_then(|e| e.get("message"))
                                                .and_then(|m| m.as_str())
                                                .unwrap_or("unknown upstream error")
                                                .to_string();
                                            yield Err(AdapterError::Api { code: 500, message });
                                            return;
                                        }
                                        _ => {}
                                    }
                                }
                                Err(e) => yield Err(AdapterError::Serialization(e)),
                            }
                        }
                    }
                    Err(e) => yield Err(AdapterError::Http(e)),
                }
            }
        });

        Ok(stream)
    }

    async fn health_check(&self) -> Result<HealthStatus, AdapterError> {
        let health_request = AnthropicRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            max_tokens: 1,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: "Hi".to_string(),
            }],
            temperature: Some(0.0),
            stream: Some(false),
        };

        match self
            .http
            .post_json::<AnthropicRequest, serde_json::Value>("/v1/messages", &health_request)
            .await
        {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(_) => Ok(HealthStatus::Degraded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_only_conversation_becomes_single_user_message() {
        let messages = vec![Message::system("be terse")];
        let converted = AnthropicAdapter::convert_messages(messages);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
        assert_eq!(converted[0].content, "be terse");
    }

    #[test]
    fn system_message_is_prepended_to_first_user_message() {
        let messages = vec![Message::system("be terse"), Message::user("hi")];
        let converted = AnthropicAdapter::convert_messages(messages);
        assert_eq!(converted.len(), 1);
        assert!(converted[0].content.starts_with("be terse"));
        assert!(converted[0].content.ends_with("hi"));
    }
}
