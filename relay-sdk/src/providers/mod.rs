//! Adapter implementations (C4, §4.4).
//!
//! An Adapter is a stateful client bound to exactly one
//! `(provider_type, base_url, model, api_key)` tuple. `create_adapter`
//! is the factory the Adapter Pool uses to build one when a pool is empty.
//! OpenAI-wire-compatible backends (`openai`, `volcengine`, `custom`,
//! `private`) share a single implementation since they speak the same
//! request/response/SSE shape; `anthropic` and `google` get their own.

use crate::domain::{HealthStatus, ProviderType};
use crate::error::AdapterError;
use crate::models::{ChatRequest, ChatResponse, ImageRequest, ImageResponse, StreamChunk};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

pub mod anthropic;
pub mod google;
pub mod http_client;
pub mod openai_compatible;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use openai_compatible::OpenAiCompatibleAdapter;

/// A lazy sequence of normalized OpenAI-shaped stream chunks. Anthropic- and
/// Google-family adapters translate their native event stream into this
/// shape at the adapter boundary so everything above it is homogeneous.
pub type StreamResult = Pin<Box<dyn Stream<Item = Result<StreamChunk, AdapterError>> + Send>>;

/// Construction parameters for an Adapter: one (base_url, api_key) pair
/// plus the merged per-link params from the Registry (§4.2 step 3).
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
}

impl AdapterConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            headers: HashMap::new(),
        }
    }
}

/// Protocol client for one (provider, model) pair (§4.4).
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse, AdapterError>;

    async fn stream_chat_completion(
        &self,
        request: ChatRequest,
    ) -> Result<StreamResult, AdapterError>;

    /// Bounded probe; typically a minimal completion or a models listing.
    async fn health_check(&self) -> Result<HealthStatus, AdapterError>;

    fn supports_images(&self) -> bool {
        false
    }

    async fn create_image(&self, _request: ImageRequest) -> Result<ImageResponse, AdapterError> {
        Err(AdapterError::FeatureNotSupported {
            feature: "image generation".to_string(),
        })
    }

    /// Releases underlying transport resources. The default no-op is
    /// correct for adapters backed by a cloneable `reqwest::Client`, whose
    /// connection pool is reclaimed on `Drop`.
    async fn close(&self) {}
}

/// Builds the Adapter for a given provider type (§4.4). `openai`,
/// `volcengine`, `custom`, and `private` are all OpenAI-wire-compatible and
/// share [`OpenAiCompatibleAdapter`].
pub fn create_adapter(
    provider_type: ProviderType,
    config: AdapterConfig,
) -> Result<Box<dyn Adapter>, AdapterError> {
    match provider_type {
        ProviderType::Openai | ProviderType::Volcengine | ProviderType::Custom | ProviderType::Private => {
            Ok(Box::new(OpenAiCompatibleAdapter::new(provider_type, config)?))
        }
        ProviderType::Anthropic => Ok(Box::new(AnthropicAdapter::new(config)?)),
        ProviderType::Google => Ok(Box::new(GoogleAdapter::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_adapter_groups_openai_compatible_types() {
        let cfg = AdapterConfig::new("https://api.example.com", "sk-test");
        for pt in [
            ProviderType::Openai,
            ProviderType::Volcengine,
            ProviderType::Custom,
            ProviderType::Private,
        ] {
            let adapter = create_adapter(pt, cfg.clone()).unwrap();
            assert_eq!(adapter.provider_type(), pt);
        }
    }

    #[test]
    fn create_adapter_builds_anthropic_and_google() {
        let cfg = AdapterConfig::new("https://api.anthropic.com", "sk-ant");
        assert_eq!(
            create_adapter(ProviderType::Anthropic, cfg.clone())
                .unwrap()
                .provider_type(),
            ProviderType::Anthropic
        );
        assert_eq!(
            create_adapter(ProviderType::Google, cfg)
                .unwrap()
                .provider_type(),
            ProviderType::Google
        );
    }
}
