//! Fallback error types.
//!
//! [`ProviderError`] describes why one attempt failed. It is recorded in the
//! attempt history and drives strategy decisions, but it never escapes the
//! cascade on its own. [`FallbackError`] is what the caller sees.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Why a single attempt against one model failed
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
pub enum ProviderError {
    /// The provider did not answer in time
    #[error("Request timed out after {}ms", .after.as_millis())]
    Timeout {
        /// How long the call ran before giving up
        after: Duration,
    },

    /// The provider rejected the request for rate limiting
    #[error("Rate limited by provider")]
    RateLimited {
        /// Provider hint for when to try again
        retry_after: Option<Duration>,
    },

    /// The provider answered with a non-success status
    #[error("Provider returned status {code}: {message}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The connection could not be established or was dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// No client could be built for the target model
    #[error("No client available for model {model}: {reason}")]
    ClientUnavailable {
        /// Model the factory was asked for
        model: String,
        /// Factory error message
        reason: String,
    },

    /// Anything else the provider reported
    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Error class name used for mapping lookups and eligibility filters
    #[must_use]
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TimeoutError",
            Self::RateLimited { .. } => "RateLimitError",
            Self::Status { code, .. } if *code >= 500 => "ServerError",
            Self::Status { .. } => "HttpStatusError",
            Self::Connection(_) => "ConnectionError",
            Self::ClientUnavailable { .. } => "ClientError",
            Self::Other(_) => "ProviderError",
        }
    }

    /// HTTP status associated with this error, if any
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Whether this is a rate limit rejection
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether this is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Provider-supplied wait hint
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Terminal errors returned to callers of the fallback manager
#[derive(Debug, Error)]
pub enum FallbackError {
    /// The configured strategy type is not recognised
    #[error("Unsupported fallback strategy: {0}")]
    UnsupportedStrategy(String),

    /// Fallback is disabled and the single primary attempt failed
    #[error("Model {model} failed: {source}")]
    Provider {
        /// Model that was called
        model: String,
        /// Underlying failure
        #[source]
        source: ProviderError,
    },

    /// Every permitted attempt failed
    ///
    /// The per-attempt failures live in the session recorded under
    /// `session_id`, not in an error chain.
    #[error("All {attempts} attempt(s) failed for primary model {primary_model}")]
    Exhausted {
        /// Model the call was made for
        primary_model: String,
        /// Number of attempts made
        attempts: u32,
        /// Failure of the final attempt
        last_error: Option<ProviderError>,
        /// Session holding the full attempt history
        session_id: Uuid,
    },
}
