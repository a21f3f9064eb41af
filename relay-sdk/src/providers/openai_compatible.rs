//! Adapter for OpenAI-wire-compatible backends: `openai`, `volcengine`,
//! `custom`, and `private` (§3 `provider_type`). All four speak the same
//! `/v1/chat/completions` request/response/SSE shape; only the base URL,
//! auth header, and default endpoint differ.

use crate::domain::{HealthStatus, ProviderType};
use crate::error::AdapterError;
use crate::models::{ChatRequest, ChatResponse, Message, StreamChunk};
use async_stream::stream;
use std::time::Instant;

use super::http_client::{map_error_response, AuthStrategy, HttpProviderClient};
use super::{Adapter, AdapterConfig, StreamResult};

pub struct OpenAiCompatibleAdapter {
    http: HttpProviderClient,
    provider_type: ProviderType,
}

impl OpenAiCompatibleAdapter {
    pub fn new(provider_type: ProviderType, config: AdapterConfig) -> Result<Self, AdapterError> {
        let http = HttpProviderClient::new(
            config.timeout,
            Some(config.base_url),
            "https://api.openai.com",
            &config.headers,
            AuthStrategy::Bearer {
                token: config.api_key,
            },
        )?;
        Ok(Self { http, provider_type })
    }
}

#[async_trait::async_trait]
impl Adapter for OpenAiCompatibleAdapter {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError> {
        self.http
            .post_json("/v1/chat/completions", &request)
            .await
    }

    async fn stream_chat_completion(
        &self,
        mut request: ChatRequest,
    ) -> Result<StreamResult, AdapterError> {
        request.stream = Some(true);
        let response = self
            .http
            .post_json_raw("/v1/chat/completions", &request)
            .await?;

        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let stream = Box::pin(stream! {
            let mut bytes_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = futures::StreamExt::next(&mut bytes_stream).await {
                match chunk_result {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        while let Some(line_end) = buffer.find('\n') {
                            let line = buffer[..line_end].trim().to_string();
                            buffer = buffer[line_end + 1..].to_string();

                            let Some(json_str) = line.strip_prefix("data: ") else { continue };
                            if json_str == "[DONE]" {
                                return;
                            }

                            match serde_json::from_str::<StreamChunk>(json_str) {
                                Ok(stream_chunk) => yield Ok(stream_chunk),
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
        let start = Instant::now();
        let probe = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![Message::user("ping")],
            max_tokens: Some(1),
            ..Default::default()
        };

        let result: Result<ChatResponse, AdapterError> =
            self.http.post_json("/v1/chat/completions", &probe).await;
        let elapsed = start.elapsed();

        match result {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(AdapterError::Timeout) => Ok(HealthStatus::Unhealthy),
            Err(_) if elapsed.as_secs() > 5 => Ok(HealthStatus::Degraded),
            Err(_) => Ok(HealthStatus::Degraded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_reports_its_provider_type() {
        let cfg = AdapterConfig::new("https://api.openai.com", "sk-test");
        let adapter = OpenAiCompatibleAdapter::new(ProviderType::Volcengine, cfg).unwrap();
        assert_eq!(adapter.provider_type(), ProviderType::Volcengine);
    }
}
