//! Fallback Strategies
//!
//! Pluggable policy objects answering three questions for the cascade:
//!
//! - may another attempt be made? ([`FallbackStrategy::should_fallback`])
//! - against which model? ([`FallbackStrategy::get_fallback_target`])
//! - after how long? ([`FallbackStrategy::get_fallback_delay`])
//!
//! # Variants
//!
//! ```text
//! Sequential      fallback_models[0], [1], ... in order
//! Priority        error_mappings[error class] in order, else Sequential
//! Random          uniform draw from not-yet-used candidates
//! ErrorTypeBased  Priority targets, delay scaled by error category
//! ```
//!
//! Attempt index 0 always means "the primary model" and yields `None`.
//! Strategies are selected once, by [`create_fallback_strategy`].

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use super::config::FallbackConfig;
use super::error::{FallbackError, ProviderError};

/// Delay multiplier applied to rate-limit errors by [`ErrorTypeBasedStrategy`]
pub const RATE_LIMIT_DELAY_FACTOR: f64 = 3.0;

/// Delay multiplier applied to timeouts by [`ErrorTypeBasedStrategy`]
pub const TIMEOUT_DELAY_FACTOR: f64 = 2.0;

// ============================================================================
// Strategy Trait
// ============================================================================

/// Decision object consulted by the fallback manager
pub trait FallbackStrategy: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Configuration this strategy was built from
    fn config(&self) -> &FallbackConfig;

    /// Whether another attempt is permitted after `attempt_number` failed
    fn should_fallback(&self, error: &ProviderError, attempt_number: u32) -> bool;

    /// Model for attempt `attempt_index` (0 = primary, yields `None`)
    ///
    /// `None` for `attempt_index >= 1` means the candidates are exhausted.
    fn get_fallback_target(&self, error: Option<&ProviderError>, attempt_index: u32)
        -> Option<String>;

    /// Delay to wait before attempt `attempt_number`
    fn get_fallback_delay(&self, _error: Option<&ProviderError>, attempt_number: u32) -> Duration {
        self.config().backoff_for_attempt(attempt_number)
    }
}

/// Shared bound check: attempts left and the error is eligible
fn within_limits(config: &FallbackConfig, error: &ProviderError, attempt_number: u32) -> bool {
    attempt_number < config.max_attempts && config.should_fallback_on_error(error)
}

/// `candidates[attempt_index - 1]`, or `None` for the primary slot
fn nth_candidate(candidates: &[String], attempt_index: u32) -> Option<String> {
    let index = usize::try_from(attempt_index).ok()?.checked_sub(1)?;
    candidates.get(index).cloned()
}

// ============================================================================
// Sequential
// ============================================================================

/// Walks `fallback_models` in configured order
#[derive(Clone, Debug)]
pub struct SequentialFallbackStrategy {
    config: FallbackConfig,
}

impl SequentialFallbackStrategy {
    /// Create a sequential strategy
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }
}

impl FallbackStrategy for SequentialFallbackStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn config(&self) -> &FallbackConfig {
        &self.config
    }

    fn should_fallback(&self, error: &ProviderError, attempt_number: u32) -> bool {
        within_limits(&self.config, error, attempt_number)
            && (attempt_number as usize) <= self.config.fallback_models.len()
    }

    fn get_fallback_target(
        &self,
        _error: Option<&ProviderError>,
        attempt_index: u32,
    ) -> Option<String> {
        nth_candidate(&self.config.fallback_models, attempt_index)
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Picks candidates from a per-error-class priority list
///
/// Errors with no mapping use `fallback_models` exactly like
/// [`SequentialFallbackStrategy`].
#[derive(Clone, Debug)]
pub struct PriorityFallbackStrategy {
    config: FallbackConfig,
    priorities: HashMap<String, Vec<String>>,
}

impl PriorityFallbackStrategy {
    /// Create a priority strategy seeded from `config.error_mappings`
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        let priorities = config.error_mappings.clone();
        Self { config, priorities }
    }

    /// Set the candidate order for an error class
    #[must_use]
    pub fn with_priority(mut self, error_class: impl Into<String>, models: Vec<String>) -> Self {
        self.priorities.insert(error_class.into(), models);
        self
    }

    /// Ordered candidates for `error`
    #[must_use]
    pub fn candidates(&self, error: Option<&ProviderError>) -> &[String] {
        error
            .and_then(|e| self.priorities.get(e.class_name()))
            .map_or(self.config.fallback_models.as_slice(), Vec::as_slice)
    }
}

impl FallbackStrategy for PriorityFallbackStrategy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn config(&self) -> &FallbackConfig {
        &self.config
    }

    fn should_fallback(&self, error: &ProviderError, attempt_number: u32) -> bool {
        within_limits(&self.config, error, attempt_number)
            && (attempt_number as usize) <= self.candidates(Some(error)).len()
    }

    fn get_fallback_target(
        &self,
        error: Option<&ProviderError>,
        attempt_index: u32,
    ) -> Option<String> {
        let target = nth_candidate(self.candidates(error), attempt_index);
        if let (Some(model), Some(e)) = (&target, error) {
            tracing::debug!(
                error_class = e.class_name(),
                model = %model,
                attempt_index,
                "Priority fallback target selected"
            );
        }
        target
    }
}

// ============================================================================
// Random
// ============================================================================

/// Draws uniformly from candidates not yet used by this instance
///
/// The used set lives as long as the instance. The fallback manager builds
/// a fresh instance per call; callers sharing one instance across calls
/// should [`reset`](Self::reset) it between them.
#[derive(Debug)]
pub struct RandomFallbackStrategy {
    config: FallbackConfig,
    candidates: Vec<String>,
    used: Mutex<HashSet<String>>,
}

impl RandomFallbackStrategy {
    /// Create a random strategy over `config.fallback_models`
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        let mut candidates: Vec<String> = Vec::with_capacity(config.fallback_models.len());
        for model in &config.fallback_models {
            if !candidates.contains(model) {
                candidates.push(model.clone());
            }
        }
        Self {
            config,
            candidates,
            used: Mutex::new(HashSet::new()),
        }
    }

    /// Forget every model drawn so far
    pub fn reset(&self) {
        self.used.lock().clear();
    }

    /// Candidates not yet drawn
    #[must_use]
    pub fn remaining(&self) -> Vec<String> {
        let used = self.used.lock();
        self.candidates
            .iter()
            .filter(|m| !used.contains(*m))
            .cloned()
            .collect()
    }
}

impl FallbackStrategy for RandomFallbackStrategy {
    fn name(&self) -> &'static str {
        "random"
    }

    fn config(&self) -> &FallbackConfig {
        &self.config
    }

    fn should_fallback(&self, error: &ProviderError, attempt_number: u32) -> bool {
        within_limits(&self.config, error, attempt_number) && !self.remaining().is_empty()
    }

    fn get_fallback_target(
        &self,
        _error: Option<&ProviderError>,
        attempt_index: u32,
    ) -> Option<String> {
        if attempt_index == 0 {
            return None;
        }

        let mut used = self.used.lock();
        let unused: Vec<&String> = self
            .candidates
            .iter()
            .filter(|m| !used.contains(*m))
            .collect();
        let choice = unused.choose(&mut rand::thread_rng())?.to_string();
        used.insert(choice.clone());
        Some(choice)
    }
}

// ============================================================================
// Error-Type Based
// ============================================================================

/// Priority targets with delays scaled by error category
///
/// Rate limits wait longest and honour the provider's `retry_after`;
/// timeouts wait longer than generic errors. Every delay, hints included,
/// is capped at `max_delay`.
#[derive(Clone, Debug)]
pub struct ErrorTypeBasedStrategy {
    inner: PriorityFallbackStrategy,
}

impl ErrorTypeBasedStrategy {
    /// Create an error-type based strategy
    #[must_use]
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            inner: PriorityFallbackStrategy::new(config),
        }
    }

    /// Delay multiplier for an error category
    #[must_use]
    pub fn delay_factor(error: Option<&ProviderError>) -> f64 {
        match error {
            Some(e) if e.is_rate_limit() => RATE_LIMIT_DELAY_FACTOR,
            Some(e) if e.is_timeout() => TIMEOUT_DELAY_FACTOR,
            _ => 1.0,
        }
    }
}

impl FallbackStrategy for ErrorTypeBasedStrategy {
    fn name(&self) -> &'static str {
        "error_type"
    }

    fn config(&self) -> &FallbackConfig {
        self.inner.config()
    }

    fn should_fallback(&self, error: &ProviderError, attempt_number: u32) -> bool {
        self.inner.should_fallback(error, attempt_number)
    }

    fn get_fallback_target(
        &self,
        error: Option<&ProviderError>,
        attempt_index: u32,
    ) -> Option<String> {
        self.inner.get_fallback_target(error, attempt_index)
    }

    fn get_fallback_delay(&self, error: Option<&ProviderError>, attempt_number: u32) -> Duration {
        let max = self.config().max_delay();
        let base_ms = self.config().backoff_for_attempt(attempt_number).as_millis() as f64;
        let scaled = Duration::from_millis((base_ms * Self::delay_factor(error)).round() as u64)
            .min(max);
        // A provider hint raises the delay but never past max_delay
        match error.and_then(ProviderError::retry_after) {
            Some(hint) => scaled.max(hint.min(max)),
            None => scaled,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Known strategy types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    /// [`SequentialFallbackStrategy`]
    Sequential,
    /// [`PriorityFallbackStrategy`]
    Priority,
    /// [`RandomFallbackStrategy`]
    Random,
    /// [`ErrorTypeBasedStrategy`]
    ErrorTypeBased,
}

impl FromStr for StrategyKind {
    type Err = FallbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "priority" => Ok(Self::Priority),
            "random" => Ok(Self::Random),
            "error_type" | "error_type_based" => Ok(Self::ErrorTypeBased),
            _ => Err(FallbackError::UnsupportedStrategy(s.to_string())),
        }
    }
}

/// Build the strategy named by `config.strategy_type`
///
/// # Errors
///
/// Returns [`FallbackError::UnsupportedStrategy`] for unknown type strings.
pub fn create_fallback_strategy(
    config: &FallbackConfig,
) -> Result<Box<dyn FallbackStrategy>, FallbackError> {
    let kind: StrategyKind = config.strategy_type.parse()?;
    let config = config.clone();
    Ok(match kind {
        StrategyKind::Sequential => Box::new(SequentialFallbackStrategy::new(config)),
        StrategyKind::Priority => Box::new(PriorityFallbackStrategy::new(config)),
        StrategyKind::Random => Box::new(RandomFallbackStrategy::new(config)),
        StrategyKind::ErrorTypeBased => Box::new(ErrorTypeBasedStrategy::new(config)),
    })
}

// ============================================================================
// Tests
// ============================================================================
