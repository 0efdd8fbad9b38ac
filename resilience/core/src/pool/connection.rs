//! Pooled Connection Types
//!
//! A [`PooledEntry`] wraps one reusable handle with the two timestamps the
//! validity rule needs. Handles come from a [`Connector`], which owns their
//! lifecycle (create, close); the pool never looks inside them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::connection_pool::PoolError;

/// Default cap on sockets inside one HTTP session
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default cap on idle entries per endpoint
pub const DEFAULT_MAX_KEEPALIVE: usize = 20;

/// Entries older than this are discarded on acquire
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Entries idle longer than this are discarded on acquire
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(10 * 60);

// ============================================================================
// Settings
// ============================================================================

/// Pool and connector limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Socket cap for each HTTP session handle
    pub max_connections: usize,
    /// Idle entries kept per endpoint
    pub max_keepalive: usize,
    /// Request timeout for HTTP session handles (ms)
    pub timeout_ms: u64,
    /// Maximum entry age (ms)
    pub max_lifetime_ms: u64,
    /// Maximum time an entry may sit idle (ms)
    pub max_idle_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_keepalive: DEFAULT_MAX_KEEPALIVE,
            timeout_ms: 30_000,
            max_lifetime_ms: DEFAULT_MAX_LIFETIME.as_millis() as u64,
            max_idle_ms: DEFAULT_MAX_IDLE.as_millis() as u64,
        }
    }
}

impl PoolSettings {
    /// Convert to Duration for the request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Convert to Duration for the lifetime limit
    #[must_use]
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    /// Convert to Duration for the idle limit
    #[must_use]
    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }
}

// ============================================================================
// Pooled Entry
// ============================================================================

/// A handle plus its age and idle timestamps
#[derive(Debug)]
pub struct PooledEntry<H> {
    /// The pooled handle
    pub handle: H,
    /// When the handle was admitted fresh
    pub created_at: Instant,
    /// When the handle was last released
    pub last_used: Instant,
}

impl<H> PooledEntry<H> {
    /// Wrap a handle, stamping both timestamps now
    pub fn new(handle: H) -> Self {
        let now = Instant::now();
        Self {
            handle,
            created_at: now,
            last_used: now,
        }
    }

    /// Stamp `last_used`
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Time since creation
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Time since the last release
    #[must_use]
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Valid iff `age ≤ max_lifetime` and `idle ≤ max_idle`
    #[must_use]
    pub fn is_valid(&self, now: Instant, max_lifetime: Duration, max_idle: Duration) -> bool {
        self.age(now) <= max_lifetime && self.idle_time(now) <= max_idle
    }

    /// Unwrap the handle
    pub fn into_handle(self) -> H {
        self.handle
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Creates and closes pooled handles
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Handle type the pool stores
    type Handle: Send + 'static;

    /// Open a handle bound to `endpoint`
    async fn connect(&self, endpoint: &str) -> Result<Self::Handle, PoolError>;

    /// Close a handle the pool is discarding
    async fn close(&self, handle: Self::Handle);
}

/// HTTP session bound to one endpoint
#[derive(Clone, Debug)]
pub struct HttpSession {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSession {
    /// Endpoint this session was opened for
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Underlying client
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Absolute URL for `path` under the endpoint
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Connector producing [`HttpSession`]s
#[derive(Clone, Debug)]
pub struct HttpConnector {
    max_connections: usize,
    timeout: Duration,
}

impl HttpConnector {
    /// Create a connector from pool settings
    #[must_use]
    pub fn new(settings: &PoolSettings) -> Self {
        Self {
            max_connections: settings.max_connections,
            timeout: settings.timeout(),
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    type Handle = HttpSession;

    async fn connect(&self, endpoint: &str) -> Result<HttpSession, PoolError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_max_idle_per_host(self.max_connections)
            .build()
            .map_err(|e| PoolError::ConnectionFailed(e.to_string()))?;

        Ok(HttpSession {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    async fn close(&self, handle: HttpSession) {
        tracing::trace!(endpoint = %handle.endpoint, "Closing HTTP session");
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_validity_windows() {
        let entry = PooledEntry::new(());
        let lifetime = Duration::from_secs(30 * 60);
        let idle = Duration::from_secs(10 * 60);

        assert!(entry.is_valid(Instant::now(), lifetime, idle));

        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        assert!(entry.is_valid(Instant::now(), lifetime, idle));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!entry.is_valid(Instant::now(), lifetime, idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_idle_but_not_age() {
        let mut entry = PooledEntry::new(());
        let lifetime = Duration::from_secs(30 * 60);
        let idle = Duration::from_secs(10 * 60);

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(9 * 60)).await;
            entry.touch();
        }
        assert!(entry.is_valid(Instant::now(), lifetime, idle));

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        // 31 minutes old, 4 minutes idle
        assert!(!entry.is_valid(Instant::now(), lifetime, idle));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_keepalive, 20);
        assert_eq!(settings.max_lifetime(), DEFAULT_MAX_LIFETIME);
        assert_eq!(settings.max_idle(), DEFAULT_MAX_IDLE);
    }

    #[tokio::test]
    async fn test_http_connector_binds_endpoint() {
        let connector = HttpConnector::new(&PoolSettings::default());
        let session = connector.connect("https://api.example.com/").await.unwrap();

        assert_eq!(session.endpoint(), "https://api.example.com/");
        assert_eq!(
            session.url("/v1/chat"),
            "https://api.example.com/v1/chat"
        );
        connector.close(session).await;
    }
}
