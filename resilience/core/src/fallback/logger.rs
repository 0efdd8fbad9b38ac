//! Fallback event logging.
//!
//! The manager reports every failed attempt, the first success and the
//! terminal failure to a [`FallbackLogger`]. [`TracingFallbackLogger`] turns
//! these into `tracing` events and keeps them in an append-only buffer for
//! inspection.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use crate::backend::LlmResponse;

/// Receiver for cascade notifications
pub trait FallbackLogger: Send + Sync {
    /// An attempt against `target` failed
    fn log_fallback_attempt(
        &self,
        primary: &str,
        target: &str,
        error: &ProviderError,
        attempt_number: u32,
    );

    /// `target` answered on attempt `attempt_number`
    fn log_fallback_success(
        &self,
        primary: &str,
        target: &str,
        response: &LlmResponse,
        attempt_number: u32,
    );

    /// The cascade for `primary` gave up after `attempt_count` attempts
    fn log_fallback_failure(&self, primary: &str, error: Option<&ProviderError>, attempt_count: u32);
}

/// A buffered notification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FallbackLogEntry {
    /// Failed attempt
    Attempt {
        /// Primary model
        primary: String,
        /// Model that failed
        target: String,
        /// Failure message
        error: String,
        /// 1-based attempt number
        attempt_number: u32,
        /// When it was logged
        at: DateTime<Utc>,
    },
    /// Successful attempt
    Success {
        /// Primary model
        primary: String,
        /// Model that answered
        target: String,
        /// Model reported by the response
        response_model: String,
        /// 1-based attempt number
        attempt_number: u32,
        /// When it was logged
        at: DateTime<Utc>,
    },
    /// Exhausted cascade
    Failure {
        /// Primary model
        primary: String,
        /// Last failure message
        error: Option<String>,
        /// Attempts made
        attempt_count: u32,
        /// When it was logged
        at: DateTime<Utc>,
    },
}

/// Default logger: `tracing` events plus an inspection buffer
///
/// A disabled logger ignores every notification.
#[derive(Debug)]
pub struct TracingFallbackLogger {
    enabled: bool,
    entries: Mutex<Vec<FallbackLogEntry>>,
}

impl Default for TracingFallbackLogger {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TracingFallbackLogger {
    /// Create a logger
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// A logger that records nothing
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Whether notifications are recorded
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Copy of every buffered entry, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<FallbackLogEntry> {
        self.entries.lock().clone()
    }

    /// Number of buffered entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn push(&self, entry: FallbackLogEntry) {
        self.entries.lock().push(entry);
    }
}

impl FallbackLogger for TracingFallbackLogger {
    fn log_fallback_attempt(
        &self,
        primary: &str,
        target: &str,
        error: &ProviderError,
        attempt_number: u32,
    ) {
        if !self.enabled {
            return;
        }
        tracing::warn!(
            primary = %primary,
            target = %target,
            attempt = attempt_number,
            error_class = error.class_name(),
            "Attempt {attempt_number} with {target} failed: {error}"
        );
        self.push(FallbackLogEntry::Attempt {
            primary: primary.to_string(),
            target: target.to_string(),
            error: error.to_string(),
            attempt_number,
            at: Utc::now(),
        });
    }

    fn log_fallback_success(
        &self,
        primary: &str,
        target: &str,
        response: &LlmResponse,
        attempt_number: u32,
    ) {
        if !self.enabled {
            return;
        }
        tracing::info!(
            primary = %primary,
            target = %target,
            attempt = attempt_number,
            "Attempt {attempt_number} with {target} succeeded"
        );
        self.push(FallbackLogEntry::Success {
            primary: primary.to_string(),
            target: target.to_string(),
            response_model: response.model.clone(),
            attempt_number,
            at: Utc::now(),
        });
    }

    fn log_fallback_failure(&self, primary: &str, error: Option<&ProviderError>, attempt_count: u32) {
        if !self.enabled {
            return;
        }
        let message = error.map(ToString::to_string);
        tracing::warn!(
            primary = %primary,
            attempts = attempt_count,
            "All {attempt_count} attempt(s) for {primary} failed: {}",
            message.as_deref().unwrap_or("no attempt made")
        );
        self.push(FallbackLogEntry::Failure {
            primary: primary.to_string(),
            error: message,
            attempt_count,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_when_enabled() {
        let logger = TracingFallbackLogger::default();
        let err = ProviderError::Connection("reset".into());

        logger.log_fallback_attempt("gpt-4", "gpt-4", &err, 1);
        logger.log_fallback_success("gpt-4", "claude-3", &LlmResponse::new("hi", "claude-3"), 2);

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            &entries[0],
            FallbackLogEntry::Attempt { attempt_number: 1, target, .. } if target == "gpt-4"
        ));
        assert!(matches!(
            &entries[1],
            FallbackLogEntry::Success { attempt_number: 2, response_model, .. } if response_model == "claude-3"
        ));
    }

    #[test]
    fn test_disabled_is_noop() {
        let logger = TracingFallbackLogger::disabled();
        logger.log_fallback_attempt("a", "a", &ProviderError::Other("x".into()), 1);
        logger.log_fallback_failure("a", None, 1);
        assert!(logger.is_empty());
    }

    #[test]
    fn test_failure_entry_serializes() {
        let logger = TracingFallbackLogger::default();
        logger.log_fallback_failure("a", Some(&ProviderError::Other("x".into())), 3);

        let json = serde_json::to_value(&logger.entries()[0]).unwrap();
        assert_eq!(json["event"], "failure");
        assert_eq!(json["attempt_count"], 3);
    }
}
