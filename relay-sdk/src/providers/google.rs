//! Adapter for Google's Gemini `generateContent` API.
//!
//! Gemini's `contents[].parts[].text` shape is converted to and from the
//! canonical OpenAI-shaped request/response at this boundary (§4.4), the
//! same way the Anthropic adapter translates Anthropic's shape.

use crate::domain::{HealthStatus, ProviderType};
use crate::error::AdapterError;
use crate::models::{ChatRequest, ChatResponse, Choice, Message, Role, StreamChunk};
use async_stream::stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Adapter, AdapterConfig, StreamResult};

pub struct GoogleAdapter {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "generationConfig")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContentResponse,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}

impl GoogleAdapter {
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdapterError::Configuration {
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url,
            api_key: config.api_key,
        })
    }

    fn convert_request(request: &ChatRequest) -> GeminiRequest {
        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::Tool)
            .map(|m| GeminiContent {
                role: match m.role {
                    Role::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                },
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GeminiRequest {
            contents,
            generation_config: Some(GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            }),
        }
    }

    fn convert_response(model: &str, response: GeminiResponse) -> ChatResponse {
        let candidate = response.candidates.into_iter().next();
        let (content, finish_reason) = match candidate {
            Some(c) => (
                c.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join(""),
                c.finish_reason,
            ),
            None => (String::new(), None),
        };

        ChatResponse {
            id: uuid::Uuid::new_v4().to_string(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                finish_reason,
                logprobs: None,
            }],
            usage: response.usage_metadata.map(|u| crate::models::Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.prompt_token_count + u.candidates_token_count,
            }),
            system_fingerprint: None,
        }
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}?key={}",
            self.base_url.trim_end_matches('/'),
            model,
            method,
            self.api_key
        )
    }

    async fn handle_error(response: reqwest::Response) -> AdapterError {
        let status = response.status();
        match response.text().await {
            Ok(body) => {
                let message = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str()).map(str::to_string))
                    .unwrap_or(body);
                match status.as_u16() {
                    401 | 403 => AdapterError::InvalidApiKey,
                    404 => AdapterError::ModelNotFound { model: "unknown".to_string() },
                    429 => AdapterError::RateLimit,
                    code => AdapterError::Api { code, message },
                }
            }
            Err(_) => AdapterError::Api {
                code: status.as_u16(),
                message: "failed to read error response".to_string(),
            },
        }
    }
}

#[async_trait::async_trait]
impl Adapter for GoogleAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Google
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        let model = request.model.clone();
        let gemini_request = Self::convert_request(&request);
        let response = self
            .client
            .post(self.url(&model, "generateContent"))
            .json(&gemini_request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        let gemini_response: GeminiResponse = response.json().await?;
        Ok(Self::convert_response(&model, gemini_response))
    }

    async fn stream_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<StreamResult, AdapterError> {
        let model = request.model.clone();
        let gemini_request = Self::convert_request(&request);
        let response = self
            .client
            .post(self.url(&model, "streamGenerateContent"))
            .json(&gemini_request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
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
                            let line = line.trim_start_matches(',').trim_start_matches('[').trim_end_matches(']');
                            if line.is_empty() {
                                continue;
                            }

                            match serde_json::from_str::<GeminiResponse>(line) {
                                Ok(gemini_chunk) => {
                                    if let Some(candidate) = gemini_chunk.candidates.into_iter().next() {
                                        let text = candidate.content.parts.into_iter().map(|p| p.text).collect::<Vec<_>>().join("");
                                        yield Ok(StreamChunk {
                                            id: message_id.clone(),
                                            object: "chat.completion.chunk".to_string(),
                                            created: chrono::Utc::now().timestamp() as u64,
                                            model: model.clone(),
                                            choices: vec![crate::models::StreamChoice {
                                                index: 0,
                                                delta: crate::models::Delta {
                                                    role: None,
                                                    content: Some(text),
                                                    tool_calls: None,
                                                },
                                                finish_reason: candidate.finish_reason,
                                            }],
                                        });
                                    }
                                }
                                Err(_) => continue,
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
        let url = format!(
            "{}/v1beta/models?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(HealthStatus::Healthy),
            Ok(_) => Ok(HealthStatus::Degraded),
            Err(_) => Ok(HealthStatus::Unhealthy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_role_maps_to_model() {
        let request = ChatRequest {
            model: "gemini-1.5-pro".to_string(),
            messages: vec![Message::user("hi"), Message::assistant("hello")],
            ..Default::default()
        };
        let converted = GoogleAdapter::convert_request(&request);
        assert_eq!(converted.contents[0].role, "user");
        assert_eq!(converted.contents[1].role, "model");
    }
}
