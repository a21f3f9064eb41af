//! # Relay Gateway
//!
//! A thin HTTP facade over [`relay_sdk::Router`]: binds the OpenAI and
//! Anthropic wire formats onto the Router, handling bearer auth, SSE framing,
//! and the headers that keep intermediate proxies from buffering a stream.
//!
//! Provider selection, health tracking, pooling, and protocol translation all
//! live in `relay-sdk` so they can be exercised without an HTTP server; this
//! crate owns configuration loading, authentication, and request/response
//! wire formats only.
//!
//! ## Quick start
//!
//! ```no_run
//! use relay_gateway::{config::Config, server::create_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     config.validate()?;
//!     let app = create_server(config).await?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod gateway_error;
pub mod handlers;
pub mod server;

pub use server::create_server;

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::server::create_server;
    use axum::http::StatusCode;
    use axum_test::TestServer;

    #[tokio::test]
    async fn health_check_reports_healthy() {
        let config = Config::default();
        let app = create_server(config).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn unknown_model_chat_completion_returns_400_with_available_models() {
        let config = Config::default();
        let app = create_server(config).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server
            .post("/v1/chat/completions")
            .json(&serde_json::json!({
                "model": "does-not-exist",
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body = response.json::<serde_json::Value>();
        assert!(body["error"]["available_models"].is_array());
    }

    #[tokio::test]
    async fn missing_bearer_token_is_rejected_when_auth_is_configured() {
        let mut config = Config::default();
        config.auth.api_keys = vec!["sk-configured".to_string()];
        let app = create_server(config).await.unwrap();
        let server = TestServer::new(app).unwrap();
        let response = server
            .post("/v1/chat/completions")
            .json(&serde_json::json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }
}
