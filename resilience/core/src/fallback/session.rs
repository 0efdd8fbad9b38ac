//! Attempt and session records.
//!
//! A [`FallbackSession`] is the audit trail of one logical call: every
//! [`FallbackAttempt`] in order, and the terminal outcome. Embedding
//! applications read these to report "X failed, then Y failed, then Z
//! answered" without catching intermediate errors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ProviderError;
use crate::backend::LlmResponse;

/// One try against one target
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FallbackAttempt {
    /// Model the logical call was made for
    pub primary_model: String,
    /// Model actually called, when it differs from the primary
    pub fallback_model: Option<String>,
    /// Failure, when the attempt failed
    pub error: Option<ProviderError>,
    /// 1-based position within the session
    pub attempt_number: u32,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Whether the target answered
    pub success: bool,
    /// Response, when the attempt succeeded
    pub response: Option<LlmResponse>,
    /// Backoff waited before this attempt
    pub delay: Duration,
}

impl FallbackAttempt {
    /// Model this attempt called
    #[must_use]
    pub fn target(&self) -> &str {
        self.fallback_model.as_deref().unwrap_or(&self.primary_model)
    }
}

/// Full record of one logical call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FallbackSession {
    /// Unique session ID
    pub id: Uuid,
    /// Model the logical call was made for
    pub primary_model: String,
    /// When the call began
    pub start_time: DateTime<Utc>,
    /// When the call reached its terminal state
    pub end_time: Option<DateTime<Utc>>,
    /// Attempts in execution order
    pub attempts: Vec<FallbackAttempt>,
    /// Whether some attempt succeeded
    pub success: bool,
    /// Response returned to the caller
    pub final_response: Option<LlmResponse>,
    /// Error reported to the caller
    pub final_error: Option<String>,
}

impl FallbackSession {
    /// Start a session for `primary_model`
    pub fn new(primary_model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            primary_model: primary_model.into(),
            start_time: Utc::now(),
            end_time: None,
            attempts: Vec::new(),
            success: false,
            final_response: None,
            final_error: None,
        }
    }

    /// Number the next attempt will get
    #[must_use]
    pub fn next_attempt_number(&self) -> u32 {
        u32::try_from(self.attempts.len()).map_or(u32::MAX, |n| n.saturating_add(1))
    }

    /// Append a successful attempt against `target`
    pub fn record_success(&mut self, target: &str, response: LlmResponse, delay: Duration) {
        let attempt = self.attempt(target, delay, None, Some(response));
        self.attempts.push(attempt);
    }

    /// Append a failed attempt against `target`
    pub fn record_failure(&mut self, target: &str, error: ProviderError, delay: Duration) {
        let attempt = self.attempt(target, delay, Some(error), None);
        self.attempts.push(attempt);
    }

    fn attempt(
        &self,
        target: &str,
        delay: Duration,
        error: Option<ProviderError>,
        response: Option<LlmResponse>,
    ) -> FallbackAttempt {
        FallbackAttempt {
            primary_model: self.primary_model.clone(),
            fallback_model: (target != self.primary_model).then(|| target.to_string()),
            success: error.is_none(),
            error,
            attempt_number: self.next_attempt_number(),
            timestamp: Utc::now(),
            response,
            delay,
        }
    }

    /// Whether a terminal state has been reached
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Enter the success state
    ///
    /// Returns `false` (and changes nothing) if the session already ended.
    pub fn mark_success(&mut self, response: LlmResponse) -> bool {
        if self.is_finished() {
            return false;
        }
        self.end_time = Some(Utc::now());
        self.success = true;
        self.final_response = Some(response);
        true
    }

    /// Enter the failure state
    ///
    /// Returns `false` (and changes nothing) if the session already ended.
    pub fn mark_failure(&mut self, error: impl Into<String>) -> bool {
        if self.is_finished() {
            return false;
        }
        self.end_time = Some(Utc::now());
        self.success = false;
        self.final_error = Some(error.into());
        true
    }

    /// Wall-clock duration, once finished
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Models tried, in order
    #[must_use]
    pub fn tried_models(&self) -> Vec<&str> {
        self.attempts.iter().map(FallbackAttempt::target).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_numbers_increase() {
        let mut session = FallbackSession::new("primary");
        session.record_failure("primary", ProviderError::Other("a".into()), Duration::ZERO);
        session.record_failure(
            "m2",
            ProviderError::Other("b".into()),
            Duration::from_millis(10),
        );
        session.record_success("m3", LlmResponse::new("ok", "m3"), Duration::from_millis(20));

        let numbers: Vec<u32> = session.attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(session.tried_models(), vec!["primary", "m2", "m3"]);
        assert_eq!(session.attempts[0].fallback_model, None);
        assert_eq!(session.attempts[1].fallback_model.as_deref(), Some("m2"));
        assert!(session.attempts[2].success);
    }

    #[test]
    fn test_terminal_state_set_once() {
        let mut session = FallbackSession::new("primary");
        assert!(session.mark_success(LlmResponse::new("ok", "primary")));
        let end = session.end_time;

        assert!(!session.mark_failure("late"));
        assert!(!session.mark_success(LlmResponse::new("again", "primary")));
        assert_eq!(session.end_time, end);
        assert!(session.success);
        assert_eq!(session.final_error, None);
    }

    #[test]
    fn test_failure_state() {
        let mut session = FallbackSession::new("primary");
        session.record_failure("primary", ProviderError::Other("x".into()), Duration::ZERO);
        assert!(session.mark_failure("exhausted"));

        assert!(!session.success);
        assert!(session.is_finished());
        assert!(session.duration().is_some());
        assert_eq!(session.final_error.as_deref(), Some("exhausted"));
    }
}
