//! Connection Pool Management
//!
//! Reusable handles partitioned by endpoint key, with:
//! - LIFO reuse (the most recently released handle is the warmest)
//! - Age and idle validity checks on acquire
//! - A bounded idle bucket per endpoint
//! - Lock-free statistics
//!
//! # Design
//!
//! ```text
//! DashMap<endpoint, Arc<Bucket>>        double-checked insertion
//!         |
//!         v
//! Bucket: tokio Mutex<{ idle: Vec<PooledEntry>, retired }>
//!
//! acquire(ep):  pop ─► valid?   ─► reuse
//!                      invalid? ─► close, create
//!               empty ───────────► create
//!
//! release(ep, h): len < max_keepalive ─► push
//!                 otherwise           ─► close
//! ```
//!
//! Only same-endpoint operations contend. `close_all` removes buckets from
//! the map and marks them retired; an operation that locks a retired bucket
//! retries against the live map, so no released handle is ever stranded.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::connection::{Connector, PoolSettings, PooledEntry};

// ============================================================================
// Errors and Statistics
// ============================================================================

/// Pool errors
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Endpoint key was empty
    #[error("Endpoint key must not be empty")]
    InvalidEndpoint,

    /// The connector could not open a handle
    #[error("Failed to create connection: {0}")]
    ConnectionFailed(String),
}

/// Point-in-time pool statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Acquire calls
    pub total_requests: u64,
    /// Handles created
    pub created_connections: u64,
    /// Acquires served from an idle bucket
    pub connection_reuses: u64,
    /// Handles closed (stale, overflow or shutdown)
    pub closed_connections: u64,
    /// Idle handles across all buckets
    pub active_connections: usize,
    /// Endpoint keys currently tracked
    pub pools_count: usize,
}

/// Atomic statistics for lock-free updates
#[derive(Default)]
struct PoolStatsAtomic {
    total_requests: AtomicU64,
    created_connections: AtomicU64,
    connection_reuses: AtomicU64,
    closed_connections: AtomicU64,
    idle_connections: AtomicUsize,
}

impl PoolStatsAtomic {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            created_connections: self.created_connections.load(Ordering::Relaxed),
            connection_reuses: self.connection_reuses.load(Ordering::Relaxed),
            closed_connections: self.closed_connections.load(Ordering::Relaxed),
            active_connections: self.idle_connections.load(Ordering::Relaxed),
            pools_count: 0, // Calculated separately
        }
    }
}

// ============================================================================
// Buckets
// ============================================================================

struct BucketState<H> {
    idle: Vec<PooledEntry<H>>,
    retired: bool,
}

struct Bucket<H> {
    state: Mutex<BucketState<H>>,
}

impl<H> Default for Bucket<H> {
    fn default() -> Self {
        Self {
            state: Mutex::new(BucketState {
                idle: Vec::new(),
                retired: false,
            }),
        }
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

/// Per-endpoint pool of reusable handles
pub struct ConnectionPool<C: Connector> {
    connector: C,
    settings: PoolSettings,
    buckets: DashMap<String, Arc<Bucket<C::Handle>>>,
    stats: PoolStatsAtomic,
}

impl<C: Connector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("settings", &self.settings)
            .field("stats", &self.get_stats())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create an empty pool
    pub fn new(connector: C, settings: PoolSettings) -> Self {
        Self {
            connector,
            settings,
            buckets: DashMap::new(),
            stats: PoolStatsAtomic::default(),
        }
    }

    /// Limits this pool was built with
    #[must_use]
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Connector used to open and close handles
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get or create the bucket for `endpoint`
    fn bucket(&self, endpoint: &str) -> Arc<Bucket<C::Handle>> {
        if let Some(bucket) = self.buckets.get(endpoint) {
            return Arc::clone(bucket.value());
        }
        Arc::clone(self.buckets.entry(endpoint.to_string()).or_default().value())
    }

    fn existing_bucket(&self, endpoint: &str) -> Option<Arc<Bucket<C::Handle>>> {
        self.buckets.get(endpoint).map(|bucket| Arc::clone(bucket.value()))
    }

    async fn close_handle(&self, handle: C::Handle) {
        self.connector.close(handle).await;
        self.stats.closed_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Check out a handle for `endpoint`
    ///
    /// # Errors
    ///
    /// - [`PoolError::InvalidEndpoint`] for an empty key
    /// - [`PoolError::ConnectionFailed`] if a fresh handle was needed and
    ///   the connector failed
    pub async fn acquire(&self, endpoint: &str) -> Result<C::Handle, PoolError> {
        self.acquire_entry(endpoint).await.map(PooledEntry::into_handle)
    }

    /// Check out a handle together with its timestamps
    ///
    /// Returning the entry through [`release_entry`](Self::release_entry)
    /// keeps its original `created_at`, so the lifetime limit still applies.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_entry(&self, endpoint: &str) -> Result<PooledEntry<C::Handle>, PoolError> {
        if endpoint.is_empty() {
            return Err(PoolError::InvalidEndpoint);
        }
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        let popped = loop {
            let Some(bucket) = self.existing_bucket(endpoint) else {
                break None;
            };
            let mut state = bucket.state.lock().await;
            if state.retired {
                continue;
            }
            let entry = state.idle.pop();
            if entry.is_some() {
                self.stats.idle_connections.fetch_sub(1, Ordering::Relaxed);
            }
            break entry;
        };

        if let Some(entry) = popped {
            if entry.is_valid(
                Instant::now(),
                self.settings.max_lifetime(),
                self.settings.max_idle(),
            ) {
                self.stats.connection_reuses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(endpoint = %endpoint, "Reusing pooled connection");
                return Ok(entry);
            }
            tracing::debug!(endpoint = %endpoint, "Discarding stale pooled connection");
            self.close_handle(entry.handle).await;
        }

        let handle = self.connector.connect(endpoint).await?;
        // Endpoints are tracked once a connection to them exists
        self.bucket(endpoint);
        self.stats.created_connections.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(endpoint = %endpoint, "Created pooled connection");
        Ok(PooledEntry::new(handle))
    }

    /// Return a handle obtained from [`acquire`](Self::acquire)
    ///
    /// The handle is admitted with fresh timestamps while the bucket has
    /// room, and closed otherwise. Returns whether it was admitted.
    pub async fn release(&self, endpoint: &str, handle: C::Handle) -> bool {
        self.release_entry(endpoint, PooledEntry::new(handle)).await
    }

    /// Return an entry obtained from [`acquire_entry`](Self::acquire_entry)
    ///
    /// Keeps `created_at` and stamps `last_used`. Returns whether the entry
    /// was admitted.
    pub async fn release_entry(&self, endpoint: &str, mut entry: PooledEntry<C::Handle>) -> bool {
        if endpoint.is_empty() {
            tracing::warn!("Release with empty endpoint key, closing handle");
            self.close_handle(entry.handle).await;
            return false;
        }
        entry.touch();

        loop {
            let bucket = self.bucket(endpoint);
            let mut state = bucket.state.lock().await;
            if state.retired {
                continue;
            }

            if state.idle.len() < self.settings.max_keepalive {
                state.idle.push(entry);
                self.stats.idle_connections.fetch_add(1, Ordering::Relaxed);
                return true;
            }

            drop(state);
            tracing::debug!(
                endpoint = %endpoint,
                max_keepalive = self.settings.max_keepalive,
                "Idle bucket full, closing released connection"
            );
            self.close_handle(entry.handle).await;
            return false;
        }
    }

    /// Get current pool statistics
    #[must_use]
    pub fn get_stats(&self) -> PoolStats {
        let mut stats = self.stats.snapshot();
        stats.pools_count = self.buckets.len();
        stats
    }

    /// Close every idle handle and forget every endpoint
    ///
    /// Checked-out handles are untouched; releasing them afterwards admits
    /// them to new buckets.
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0usize;

        for key in keys {
            let Some((_, bucket)) = self.buckets.remove(&key) else {
                continue;
            };
            let drained = {
                let mut state = bucket.state.lock().await;
                state.retired = true;
                std::mem::take(&mut state.idle)
            };
            self.stats
                .idle_connections
                .fetch_sub(drained.len(), Ordering::Relaxed);
            for entry in drained {
                self.close_handle(entry.handle).await;
                closed += 1;
            }
        }

        tracing::info!(closed, "Connection pool closed");
    }

    /// Close idle handles that fail the validity rule
    ///
    /// Returns the number closed.
    pub async fn evict_expired(&self) -> usize {
        let buckets: Vec<Arc<Bucket<C::Handle>>> =
            self.buckets.iter().map(|e| Arc::clone(e.value())).collect();
        let max_lifetime = self.settings.max_lifetime();
        let max_idle = self.settings.max_idle();
        let mut evicted = 0;

        for bucket in buckets {
            let expired = {
                let mut state = bucket.state.lock().await;
                let now = Instant::now();
                let (keep, expired): (Vec<_>, Vec<_>) = std::mem::take(&mut state.idle)
                    .into_iter()
                    .partition(|e| e.is_valid(now, max_lifetime, max_idle));
                state.idle = keep;
                expired
            };
            self.stats
                .idle_connections
                .fetch_sub(expired.len(), Ordering::Relaxed);
            evicted += expired.len();
            for entry in expired {
                self.close_handle(entry.handle).await;
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired pooled connections");
        }
        evicted
    }

    /// Run [`evict_expired`](Self::evict_expired) every `interval`
    ///
    /// The task ends once the pool is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                pool.evict_expired().await;
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
