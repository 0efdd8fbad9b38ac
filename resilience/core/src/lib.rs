//! Resilience Core - Pooled Connections and Fallback Cascades for LLM Calls
//!
//! This crate makes outbound calls to remote model-serving backends robust
//! against transient failures, overload and per-provider outages. It knows
//! nothing about provider wire formats: requests go through a
//! [`ClientFactory`] supplied by the embedding application.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Embedding Application                       │
//! │        generate_with_fallback(request, "gpt-4")              │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                       RESILIENCE CORE                         │
//! │  ┌───────────────────────────┴──────────────────────────────┐ │
//! │  │                    FallbackManager                        │ │
//! │  │  ┌────────────┐  ┌────────────┐  ┌─────────────────────┐ │ │
//! │  │  │  Strategy  │  │  Sessions  │  │   FallbackLogger    │ │ │
//! │  │  └────────────┘  └────────────┘  └─────────────────────┘ │ │
//! │  └───────────────────────────┬──────────────────────────────┘ │
//! │                              │ ClientFactory / ModelClient     │
//! │  ┌───────────────────────────┴──────────────────────────────┐ │
//! │  │          ConnectionPool (per-endpoint buckets)            │ │
//! │  └──────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`FallbackManager`]: runs the attempt cascade and keeps session history
//! - [`FallbackStrategy`]: decides whether, where and when to fall back
//! - [`ConnectionPool`]: reusable handles keyed by endpoint
//! - [`PoolManager`]: lazily-built process-wide pool
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use resilience_core::{FallbackConfig, FallbackManager, LlmRequest, TracingFallbackLogger};
//!
//! let config = FallbackConfig::new(vec!["claude-3".into(), "gpt-3.5".into()]);
//! let manager = FallbackManager::new(
//!     config,
//!     Arc::new(MyClientFactory::new()),
//!     Arc::new(TracingFallbackLogger::default()),
//! )?;
//!
//! let response = manager
//!     .generate_with_fallback(&LlmRequest::new("Hello!", "gpt-4"), "gpt-4")
//!     .await?;
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: request/response types and the provider client boundary
//! - [`pool`]: connection pooling and the pool manager
//! - [`fallback`]: strategies, sessions, logging and the fallback manager
//! - [`config`]: TOML and environment configuration loading
//! - `test_utils`: mock connector and client factory (`test-utils` feature)

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod fallback;
pub mod pool;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports for convenience
pub use backend::{ClientFactory, LlmRequest, LlmResponse, ModelClient};

// Fallback exports
pub use fallback::{
    create_fallback_strategy, FallbackAttempt, FallbackConfig, FallbackError, FallbackLogger,
    FallbackManager, FallbackSession, FallbackStats, FallbackStrategy, ProviderError,
    TracingFallbackLogger,
};

// Pool exports
pub use pool::{
    global_pool, shutdown_global_pool, ConnectionPool, Connector, HttpConnector, PoolError,
    PoolManager, PoolSettings, PoolStats,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigSource,
    ResilienceConfig, ResilienceToml,
};
