//! Fallback Manager
//!
//! Runs one logical call as a cascade of attempts: the primary model first,
//! then candidates chosen by the configured [`FallbackStrategy`], with a
//! backoff sleep between attempts.
//!
//! # Design
//!
//! ```text
//! generate_with_fallback(request, primary)
//!     │
//!     ├─ disabled ──► call primary once ──► Ok | FallbackError::Provider
//!     │
//!     └─ enabled ───► n = 1..=max_attempts
//!                       target = strategy.get_fallback_target(last_error, n-1)
//!                                (None: primary at n=1, exhausted after)
//!                       sleep(strategy.get_fallback_delay(last_error, n))  if n > 1
//!                       call target
//!                         Ok  ──► record, log success, return
//!                         Err ──► record, log attempt, stop unless should_fallback
//!                     ──► log failure, FallbackError::Exhausted
//! ```
//!
//! Every call builds its strategy from a snapshot of the configuration, so
//! [`FallbackManager::update_config`] never changes a call already in flight
//! and Random strategy exhaustion is tracked per call. Every session is
//! appended to a bounded in-memory history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::config::FallbackConfig;
use super::error::{FallbackError, ProviderError};
use super::logger::FallbackLogger;
use super::session::FallbackSession;
use super::strategy::{create_fallback_strategy, FallbackStrategy, StrategyKind};
use crate::backend::{ClientFactory, LlmRequest, LlmResponse};

// ============================================================================
// Statistics
// ============================================================================

/// Aggregate session outcomes
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackStats {
    /// Sessions recorded since creation or the last clear
    pub total_sessions: u64,
    /// Sessions that ended with a response
    pub successful_sessions: u64,
    /// Sessions that ended with an error
    pub failed_sessions: u64,
    /// `successful_sessions / total_sessions`, 0 when there are none
    pub success_rate: f64,
}

#[derive(Default)]
struct SessionCounters {
    total: AtomicU64,
    successful: AtomicU64,
}

impl SessionCounters {
    fn record(&self, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FallbackStats {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed).min(total);
        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64
        };
        FallbackStats {
            total_sessions: total,
            successful_sessions: successful,
            failed_sessions: total - successful,
            success_rate,
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Cascade runner with session history
pub struct FallbackManager {
    config: RwLock<Arc<FallbackConfig>>,
    client_factory: Arc<dyn ClientFactory>,
    logger: Arc<dyn FallbackLogger>,
    sessions: Mutex<VecDeque<FallbackSession>>,
    counters: SessionCounters,
}

impl std::fmt::Debug for FallbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackManager")
            .field("config", &*self.config.read())
            .field("sessions", &self.sessions.lock().len())
            .finish_non_exhaustive()
    }
}

impl FallbackManager {
    /// Create a manager
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError::UnsupportedStrategy`] if
    /// `config.strategy_type` names no known strategy.
    pub fn new(
        config: FallbackConfig,
        client_factory: Arc<dyn ClientFactory>,
        logger: Arc<dyn FallbackLogger>,
    ) -> Result<Self, FallbackError> {
        config.strategy_type.parse::<StrategyKind>()?;
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            client_factory,
            logger,
            sessions: Mutex::new(VecDeque::new()),
            counters: SessionCounters::default(),
        })
    }

    /// Snapshot of the current configuration
    #[must_use]
    pub fn config(&self) -> Arc<FallbackConfig> {
        Arc::clone(&self.config.read())
    }

    /// Whether calls cascade (enabled and at least one fallback model)
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.read().is_enabled()
    }

    /// Models the client factory can build
    #[must_use]
    pub fn get_available_models(&self) -> Vec<String> {
        self.client_factory.available_models()
    }

    /// Replace the configuration for subsequent calls
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError::UnsupportedStrategy`] and keeps the old
    /// configuration if the new strategy type is unknown.
    pub fn update_config(&self, config: FallbackConfig) -> Result<(), FallbackError> {
        config.strategy_type.parse::<StrategyKind>()?;
        let retention = config.max_session_history;
        *self.config.write() = Arc::new(config);

        if let Some(max) = retention {
            let mut sessions = self.sessions.lock();
            while sessions.len() > max {
                sessions.pop_front();
            }
        }
        tracing::info!("Fallback configuration updated");
        Ok(())
    }

    /// Call `primary_model`, falling back per the configured strategy
    ///
    /// # Errors
    ///
    /// - [`FallbackError::Provider`] when fallback is disabled and the single
    ///   primary attempt fails
    /// - [`FallbackError::Exhausted`] when every permitted attempt failed
    pub async fn generate_with_fallback(
        &self,
        request: &LlmRequest,
        primary_model: &str,
    ) -> Result<LlmResponse, FallbackError> {
        let config = self.config();
        let mut session = FallbackSession::new(primary_model);

        let result = if config.is_enabled() {
            self.run_cascade(&config, request, &mut session).await
        } else {
            self.run_single(request, &mut session).await
        };

        match &result {
            Ok(response) => session.mark_success(response.clone()),
            Err(e) => session.mark_failure(e.to_string()),
        };
        self.record(session, config.max_session_history);
        result
    }

    /// One attempt on the primary, no logger notifications
    async fn run_single(
        &self,
        request: &LlmRequest,
        session: &mut FallbackSession,
    ) -> Result<LlmResponse, FallbackError> {
        let primary = session.primary_model.clone();
        match self.call_model(&primary, request).await {
            Ok(response) => {
                session.record_success(&primary, response.clone(), Duration::ZERO);
                Ok(response)
            }
            Err(error) => {
                tracing::debug!(model = %primary, error = %error, "Primary failed with fallback disabled");
                session.record_failure(&primary, error.clone(), Duration::ZERO);
                Err(FallbackError::Provider {
                    model: primary,
                    source: error,
                })
            }
        }
    }

    async fn run_cascade(
        &self,
        config: &FallbackConfig,
        request: &LlmRequest,
        session: &mut FallbackSession,
    ) -> Result<LlmResponse, FallbackError> {
        let strategy = create_fallback_strategy(config)?;
        let primary = session.primary_model.clone();
        let mut last_error: Option<ProviderError> = None;

        for attempt_number in 1..=config.max_attempts.max(1) {
            let target = match strategy.get_fallback_target(last_error.as_ref(), attempt_number - 1)
            {
                Some(model) => model,
                None if attempt_number == 1 => primary.clone(),
                None => {
                    tracing::debug!(primary = %primary, "Fallback candidates exhausted");
                    break;
                }
            };

            let delay = if attempt_number > 1 {
                strategy.get_fallback_delay(last_error.as_ref(), attempt_number)
            } else {
                Duration::ZERO
            };
            if !delay.is_zero() {
                tracing::debug!(
                    model = %target,
                    attempt = attempt_number,
                    delay_ms = delay.as_millis() as u64,
                    strategy = strategy.name(),
                    "Backing off before fallback attempt"
                );
                tokio::time::sleep(delay).await;
            }

            match self.call_model(&target, request).await {
                Ok(response) => {
                    session.record_success(&target, response.clone(), delay);
                    self.logger
                        .log_fallback_success(&primary, &target, &response, attempt_number);
                    return Ok(response);
                }
                Err(error) => {
                    session.record_failure(&target, error.clone(), delay);
                    self.logger
                        .log_fallback_attempt(&primary, &target, &error, attempt_number);
                    let proceed = strategy.should_fallback(&error, attempt_number);
                    last_error = Some(error);
                    if !proceed {
                        break;
                    }
                }
            }
        }

        let attempts = u32::try_from(session.attempts.len()).unwrap_or(u32::MAX);
        self.logger
            .log_fallback_failure(&primary, last_error.as_ref(), attempts);
        Err(FallbackError::Exhausted {
            primary_model: primary,
            attempts,
            last_error,
            session_id: session.id,
        })
    }

    /// Resolve a client for `model` and send it the request
    async fn call_model(
        &self,
        model: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse, ProviderError> {
        let client = self
            .client_factory
            .create_client(model)
            .await
            .map_err(|e| ProviderError::ClientUnavailable {
                model: model.to_string(),
                reason: e.to_string(),
            })?;
        client.call(&request.for_model(model)).await
    }

    fn record(&self, session: FallbackSession, retention: Option<usize>) {
        self.counters.record(session.success);

        let mut sessions = self.sessions.lock();
        sessions.push_back(session);
        if let Some(max) = retention {
            while sessions.len() > max {
                sessions.pop_front();
            }
        }
    }

    /// Session outcome counts
    #[must_use]
    pub fn get_stats(&self) -> FallbackStats {
        self.counters.snapshot()
    }

    /// Most recent `limit` sessions (all when `None`), oldest first
    #[must_use]
    pub fn get_sessions(&self, limit: Option<usize>) -> Vec<FallbackSession> {
        let sessions = self.sessions.lock();
        let skip = limit.map_or(0, |n| sessions.len().saturating_sub(n));
        sessions.iter().skip(skip).cloned().collect()
    }

    /// Drop the session history and reset the statistics
    pub fn clear_sessions(&self) {
        self.sessions.lock().clear();
        self.counters.reset();
    }
}

// ============================================================================
// Tests
// ============================================================================
