//! # relay-sdk
//!
//! Core domain model and routing primitives for the gateway: the
//! Repository, Registry, Credential Selector, Adapter trait and
//! implementations, Adapter Pool, Health Checker, Strategy Engine, Router,
//! and Protocol Translator.
//!
//! `relay-gateway` is a thin HTTP facade over [`router::Router`]; everything
//! that decides *which provider handles a request* lives here so it can be
//! exercised and tested without an HTTP server.
//!
//! ## Quick start
//!
//! ```no_run
//! use relay_sdk::domain::{ApiKey, Model, ModelProviderLink, Provider, ProviderType, LlmType};
//! use relay_sdk::repository::InMemoryRepository;
//! use relay_sdk::registry::Registry;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let repo = Arc::new(InMemoryRepository::new());
//! repo.insert_model(Model {
//!     id: 1,
//!     name: "gpt-4o".to_string(),
//!     llm_type: LlmType::Chat,
//!     is_enabled: true,
//!     updated_at: 0,
//! }).unwrap();
//! let registry = Registry::new(repo);
//! let _ = registry.resolve("gpt-4o").await;
//! # }
//! ```

pub mod credential;
pub mod domain;
pub mod error;
pub mod health;
pub mod models;
pub mod pool;
pub mod providers;
pub mod registry;
pub mod repository;
pub mod router;
pub mod strategy;
pub mod translate;

pub use domain::{
    ApiKey, Capability, Id, LlmType, Model, ModelProviderLink, Provider, ProviderType,
    ResolvedConfig, ResolvedProvider,
};
pub use error::{AdapterError, RouterError};
pub use health::{AggregateStatus, HealthChecker};
pub use models::{ChatRequest, ChatResponse, Choice, Message, Role, Usage};
pub use pool::AdapterPool;
pub use providers::{create_adapter, Adapter};
pub use registry::Registry;
pub use repository::{InMemoryRepository, Repository};
pub use router::Router;
pub use strategy::{ProviderInfo, Strategy, StrategyParams};

/// Result type for fallible Router operations.
pub type Result<T> = std::result::Result<T, RouterError>;
