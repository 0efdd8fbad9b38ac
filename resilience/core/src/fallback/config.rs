//! Fallback Configuration
//!
//! The in-memory structure an embedding application hands to the
//! [`FallbackManager`](super::FallbackManager). It can also be loaded from the
//! `[fallback]` section of the TOML file (see [`crate::config`]).

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;

/// Default number of sessions kept in memory
pub const DEFAULT_MAX_SESSION_HISTORY: usize = 1_000;

/// Fallback configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Master switch for the cascade
    pub enabled: bool,

    /// Upper bound on attempts per logical call, primary included
    pub max_attempts: u32,

    /// Ordered default candidates tried after the primary
    pub fallback_models: Vec<String>,

    /// Strategy name resolved by `create_fallback_strategy`
    pub strategy_type: String,

    /// Error class name -> ordered candidates for that class
    pub error_mappings: HashMap<String, Vec<String>>,

    /// Initial backoff delay
    pub base_delay_ms: u64,

    /// Maximum backoff delay
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub exponential_base: f64,

    /// Scale delays by a random factor in [0.5, 1.0]
    pub jitter: bool,

    /// Status codes that make an error fallback-eligible
    pub fallback_on_status_codes: Vec<u16>,

    /// Error class names that make an error fallback-eligible
    pub fallback_on_errors: Vec<String>,

    /// Per-provider settings passed through to client factories
    pub provider_config: HashMap<String, serde_json::Value>,

    /// Sessions kept in memory (`None` = unbounded)
    pub max_session_history: Option<usize>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            fallback_models: Vec::new(),
            strategy_type: "sequential".to_string(),
            error_mappings: HashMap::new(),
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: true,
            fallback_on_status_codes: Vec::new(),
            fallback_on_errors: Vec::new(),
            provider_config: HashMap::new(),
            max_session_history: Some(DEFAULT_MAX_SESSION_HISTORY),
        }
    }
}

impl FallbackConfig {
    /// Create a config with the given fallback candidates
    pub fn new(fallback_models: Vec<String>) -> Self {
        Self {
            fallback_models,
            ..Default::default()
        }
    }

    /// Set the strategy type
    #[must_use]
    pub fn with_strategy(mut self, strategy_type: impl Into<String>) -> Self {
        self.strategy_type = strategy_type.into();
        self
    }

    /// Set the attempt limit
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set backoff delays
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self.max_delay_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Map an error class to its own candidate order
    #[must_use]
    pub fn with_error_mapping(mut self, error_class: impl Into<String>, models: Vec<String>) -> Self {
        self.error_mappings.insert(error_class.into(), models);
        self
    }

    /// Whether the cascade runs at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.fallback_models.is_empty()
    }

    /// Convert to Duration for the base delay
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Convert to Duration for the delay cap
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Whether `error` is allowed to trigger another attempt
    ///
    /// With both filter lists empty every error is eligible.
    #[must_use]
    pub fn should_fallback_on_error(&self, error: &ProviderError) -> bool {
        if self.fallback_on_errors.is_empty() && self.fallback_on_status_codes.is_empty() {
            return true;
        }

        let class = error.class_name();
        if self.fallback_on_errors.iter().any(|e| e == class) {
            return true;
        }

        error
            .status_code()
            .is_some_and(|code| self.fallback_on_status_codes.contains(&code))
    }

    /// Backoff before attempt `attempt_number` (1-based)
    ///
    /// `min(base · exponential_base^(n−1), max)`, scaled into [0.5, 1.0] of
    /// itself when jitter is on.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt_number: u32) -> Duration {
        let exponent = i32::try_from(attempt_number.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.base_delay_ms as f64 * self.exponential_base.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64);

        let delay_ms = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };

        Duration::from_millis(delay_ms.max(0.0).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_is_enabled_requires_models() {
        let mut config = FallbackConfig::default();
        assert!(!config.is_enabled());

        config.fallback_models = models(&["m2"]);
        assert!(config.is_enabled());

        config.enabled = false;
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_backoff_without_jitter() {
        let config = FallbackConfig {
            base_delay_ms: 100,
            exponential_base: 2.0,
            max_delay_ms: 1000,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_millis(800));
        assert_eq!(config.backoff_for_attempt(5), Duration::from_millis(1000)); // Capped
    }

    #[test]
    fn test_backoff_jitter_range() {
        let config = FallbackConfig {
            base_delay_ms: 400,
            max_delay_ms: 10_000,
            jitter: true,
            ..Default::default()
        };

        for _ in 0..100 {
            let delay = config.backoff_for_attempt(2);
            assert!(delay >= Duration::from_millis(400), "{delay:?}");
            assert!(delay <= Duration::from_millis(800), "{delay:?}");
        }
    }

    #[test]
    fn test_fail_open_eligibility() {
        let config = FallbackConfig::default();
        assert!(config.should_fallback_on_error(&ProviderError::Other("x".into())));
        assert!(config.should_fallback_on_error(&ProviderError::Status {
            code: 400,
            message: "bad".into()
        }));
    }

    #[test]
    fn test_narrowed_eligibility() {
        let config = FallbackConfig {
            fallback_on_errors: vec!["TimeoutError".into()],
            fallback_on_status_codes: vec![429, 503],
            ..Default::default()
        };

        assert!(config.should_fallback_on_error(&ProviderError::Timeout {
            after: Duration::from_secs(5)
        }));
        assert!(config.should_fallback_on_error(&ProviderError::RateLimited { retry_after: None }));
        assert!(config.should_fallback_on_error(&ProviderError::Status {
            code: 503,
            message: "down".into()
        }));
        assert!(!config.should_fallback_on_error(&ProviderError::Status {
            code: 401,
            message: "denied".into()
        }));
        assert!(!config.should_fallback_on_error(&ProviderError::Connection("reset".into())));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: FallbackConfig = serde_json::from_value(serde_json::json!({
            "fallback_models": ["m2", "m3"],
            "strategy_type": "priority"
        }))
        .unwrap();

        assert_eq!(config.fallback_models, models(&["m2", "m3"]));
        assert_eq!(config.strategy_type, "priority");
        assert_eq!(config.max_attempts, 3);
        assert!(config.jitter);
    }
}
