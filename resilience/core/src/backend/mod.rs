//! Provider Client Boundary
//!
//! Abstracted access to model providers through a common trait interface.
//! The fallback cascade resolves one [`ModelClient`] per attempt through a
//! [`ClientFactory`] supplied by the embedding application.
//!
//! # Usage
//!
//! ```ignore
//! use resilience_core::backend::{ClientFactory, LlmRequest};
//!
//! let client = factory.create_client("gpt-4").await?;
//! let response = client.call(&LlmRequest::new("Hello!", "gpt-4")).await?;
//! ```

mod traits;

pub use traits::{ClientFactory, LlmRequest, LlmResponse, ModelClient};
