//! Mock Collaborators
//!
//! In-memory stand-ins for the two external boundaries, so pools and
//! cascades can be exercised without network access:
//!
//! - [`MockConnector`] hands out numbered [`MockHandle`]s and records closes
//! - [`MockClientFactory`] answers per model, with scripted failures,
//!   unavailable models and artificial latency
//!
//! # Usage
//!
//! ```ignore
//! use resilience_core::test_utils::MockClientFactory;
//!
//! let factory = MockClientFactory::new(&["gpt-4", "claude-3"]);
//! factory.fail("gpt-4", ProviderError::Other("down".into()));
//!
//! // ... run a cascade ...
//! assert_eq!(factory.request_count("claude-3"), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{ClientFactory, LlmRequest, LlmResponse, ModelClient};
use crate::fallback::ProviderError;
use crate::pool::{Connector, PoolError};

// ============================================================================
// Mock Connector
// ============================================================================

/// Handle produced by [`MockConnector`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MockHandle {
    /// Unique sequence number
    pub id: u64,
    /// Endpoint it was opened for
    pub endpoint: String,
}

#[derive(Default)]
struct ConnectorState {
    next_id: AtomicU64,
    fail_connects: AtomicBool,
    closed: Mutex<Vec<MockHandle>>,
}

/// Connector that records every close
///
/// Clones share state, so a test can keep one clone for inspection.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    /// Create a connector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connects fail (or succeed again)
    pub fn fail_connects(&self, fail: bool) {
        self.state.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Handles opened so far
    #[must_use]
    pub fn opened_count(&self) -> u64 {
        self.state.next_id.load(Ordering::SeqCst)
    }

    /// Handles closed so far
    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.state.closed.lock().len()
    }

    /// Whether `handle` has been closed
    #[must_use]
    pub fn is_closed(&self, handle: &MockHandle) -> bool {
        self.state.closed.lock().contains(handle)
    }

    /// Every closed handle, in close order
    #[must_use]
    pub fn closed_handles(&self) -> Vec<MockHandle> {
        self.state.closed.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Handle = MockHandle;

    async fn connect(&self, endpoint: &str) -> Result<MockHandle, PoolError> {
        if self.state.fail_connects.load(Ordering::SeqCst) {
            return Err(PoolError::ConnectionFailed(format!(
                "mock connect to {endpoint} refused"
            )));
        }
        Ok(MockHandle {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            endpoint: endpoint.to_string(),
        })
    }

    async fn close(&self, handle: MockHandle) {
        self.state.closed.lock().push(handle);
    }
}

// ============================================================================
// Mock Client Factory
// ============================================================================

#[derive(Default)]
struct FactoryState {
    failures: HashMap<String, ProviderError>,
    unavailable: HashSet<String>,
    latency: HashMap<String, Duration>,
    requests: Vec<LlmRequest>,
}

/// Client factory with scripted per-model outcomes
///
/// Models answer with `"<model>: <prompt>"` unless told to fail.
pub struct MockClientFactory {
    models: Vec<String>,
    state: Arc<Mutex<FactoryState>>,
}

impl MockClientFactory {
    /// Create a factory advertising `models`
    #[must_use]
    pub fn new(models: &[&str]) -> Self {
        Self {
            models: models.iter().map(ToString::to_string).collect(),
            state: Arc::new(Mutex::new(FactoryState::default())),
        }
    }

    /// Make every call to `model` fail with `error`
    pub fn fail(&self, model: &str, error: ProviderError) {
        self.state.lock().failures.insert(model.to_string(), error);
    }

    /// Make calls to `model` succeed again
    pub fn recover(&self, model: &str) {
        let mut state = self.state.lock();
        state.failures.remove(model);
        state.unavailable.remove(model);
    }

    /// Make `create_client` fail for `model`
    pub fn set_unavailable(&self, model: &str) {
        self.state.lock().unavailable.insert(model.to_string());
    }

    /// Delay every call to `model` by `latency`
    pub fn set_latency(&self, model: &str, latency: Duration) {
        self.state.lock().latency.insert(model.to_string(), latency);
    }

    /// Calls that reached `model`
    #[must_use]
    pub fn request_count(&self, model: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.model == model)
            .count()
    }

    /// Models called, in call order
    #[must_use]
    pub fn call_order(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|r| r.model.clone())
            .collect()
    }
}

#[async_trait]
impl ClientFactory for MockClientFactory {
    async fn create_client(&self, model: &str) -> anyhow::Result<Arc<dyn ModelClient>> {
        if self.state.lock().unavailable.contains(model) {
            anyhow::bail!("model {model} is not configured");
        }
        Ok(Arc::new(MockModelClient {
            model: model.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    fn available_models(&self) -> Vec<String> {
        self.models.clone()
    }
}

struct MockModelClient {
    model: String,
    state: Arc<Mutex<FactoryState>>,
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn call(&self, request: &LlmRequest) -> Result<LlmResponse, ProviderError> {
        let latency = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.latency.get(&self.model).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self.state.lock().failures.get(&self.model).cloned();
        match failure {
            Some(error) => Err(error),
            None => Ok(LlmResponse::new(
                format!("{}: {}", self.model, request.prompt),
                self.model.clone(),
            )),
        }
    }
}
