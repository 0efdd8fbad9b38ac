//! Model Client Traits
//!
//! Trait definitions for the collaborators the fallback cascade calls into.
//! The cascade never speaks a provider wire format itself; it asks a
//! [`ClientFactory`] for a [`ModelClient`] per attempt and hands it an
//! [`LlmRequest`].
//!
//! # Design Philosophy
//!
//! The traits provide a common interface for:
//! - Resolving a client for a model identifier
//! - Sending a request and receiving a complete response
//! - Listing the models the embedding application can route to
//!
//! Implementations handle provider-specific details (API formats, auth, etc.)

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fallback::ProviderError;

/// Outbound request payload
///
/// The cascade treats everything except `model` as opaque. Before each
/// attempt the manager rewrites `model` to the attempt's target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The prompt/message to send
    pub prompt: String,
    /// Model to use (provider-specific identifier)
    pub model: String,
    /// Maximum tokens in response (0 = default)
    pub max_tokens: u32,
    /// Temperature (0.0-1.0, higher = more creative)
    pub temperature: f32,
    /// System prompt (optional, prepended to conversation)
    pub system: Option<String>,
    /// Provider-specific extras passed through untouched
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: String::new(),
            max_tokens: 0,
            temperature: 0.7,
            system: None,
            extra: HashMap::new(),
        }
    }
}

impl LlmRequest {
    /// Create a new request with prompt and model
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Attach a provider-specific field
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Copy of this request addressed to another model
    #[must_use]
    pub fn for_model(&self, model: &str) -> Self {
        let mut request = self.clone();
        request.model = model.to_string();
        request
    }
}

/// Response from a model call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if available)
    pub tokens_used: Option<u32>,
    /// Response generation time in milliseconds
    pub duration_ms: Option<u64>,
}

impl LlmResponse {
    /// Create a response with just content and model
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            tokens_used: None,
            duration_ms: None,
        }
    }
}

/// A client bound to one model
///
/// Implement this trait to add support for different LLM providers.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send a request and wait for the complete response
    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError>;
}

/// Resolves model identifiers to clients
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Build (or look up) a client for `model`
    async fn create_client(&self, model: &str) -> anyhow::Result<Arc<dyn ModelClient>>;

    /// Models this factory can serve, in preference order
    fn available_models(&self) -> Vec<String>;
}
