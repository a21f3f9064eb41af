//! Error taxonomy for the gateway, in two tiers.
//!
//! `AdapterError` is what an individual Adapter call can fail with (§4.4).
//! `RouterError` is the cross-cutting taxonomy of §7 — the ten kinds a client
//! of the Router ultimately sees, each carrying whatever context it needs.
//! The Strategy Engine converts an `AdapterError` into bookkeeping
//! (`failure_count`, auto-disable) and only escalates to a `RouterError`
//! once every candidate is exhausted.

use thiserror::Error;

/// Errors returned by a single Adapter call.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {code} - {message}")]
    Api { code: u16, message: String },

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Timeout")]
    Timeout,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response format")]
    InvalidResponse,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },

    #[error("Feature not supported: {feature}")]
    FeatureNotSupported { feature: String },
}

/// The ten error kinds of §7, surfaced by the Router to its callers.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("validation error on field '{field}': {message}")]
    ValidationError { field: String, message: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("pool exhausted for {model}/{provider} after {waited_ms}ms")]
    PoolExhausted {
        model: String,
        provider: String,
        waited_ms: u64,
    },

    #[error("upstream failure from {provider}: {source}")]
    UpstreamFailure {
        provider: String,
        #[source]
        source: AdapterError,
    },

    #[error("all providers unavailable for model '{model}' ({tried} tried)")]
    AllProvidersUnavailable { model: String, tried: usize },

    #[error("circuit open for {provider} on model {model}")]
    CircuitOpen { model: String, provider: String },

    #[error("timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RouterError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_failure_displays_provider_and_source() {
        let err = RouterError::UpstreamFailure {
            provider: "openai".to_string(),
            source: AdapterError::InvalidApiKey,
        };
        let msg = err.to_string();
        assert!(msg.contains("openai"));
        assert!(msg.contains("Invalid API key"));
    }
}
