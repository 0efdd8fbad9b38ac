//! Pool Manager
//!
//! Lazily builds one [`ConnectionPool`] and hands out shared references to
//! it. The settings passed on the first call win; later settings are ignored
//! until [`PoolManager::shutdown`] closes the pool and empties the slot.
//!
//! [`global_pool`] and [`shutdown_global_pool`] operate on the process-wide
//! HTTP instance.

use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::{Connector, HttpConnector, PoolSettings};
use super::connection_pool::ConnectionPool;

static GLOBAL_POOL: PoolManager<HttpConnector> = PoolManager::new(HttpConnector::new);

/// Singleton slot for one connection pool
pub struct PoolManager<C: Connector> {
    slot: Mutex<Option<Arc<ConnectionPool<C>>>>,
    build: fn(&PoolSettings) -> C,
}

impl<C: Connector> PoolManager<C> {
    /// Create an empty manager that builds connectors with `build`
    pub const fn new(build: fn(&PoolSettings) -> C) -> Self {
        Self {
            slot: parking_lot::const_mutex(None),
            build,
        }
    }

    /// Get the pool, building it with `settings` if there is none
    pub fn get_pool(&self, settings: &PoolSettings) -> Arc<ConnectionPool<C>> {
        let mut slot = self.slot.lock();
        if let Some(pool) = slot.as_ref() {
            if pool.settings() != settings {
                tracing::debug!("Connection pool already initialized, ignoring new settings");
            }
            return Arc::clone(pool);
        }

        tracing::info!(
            max_connections = settings.max_connections,
            max_keepalive = settings.max_keepalive,
            timeout_ms = settings.timeout_ms,
            "Initializing connection pool"
        );
        let pool = Arc::new(ConnectionPool::new((self.build)(settings), settings.clone()));
        *slot = Some(Arc::clone(&pool));
        pool
    }

    /// The current pool, if one has been built
    #[must_use]
    pub fn current(&self) -> Option<Arc<ConnectionPool<C>>> {
        self.slot.lock().clone()
    }

    /// Close the pool and empty the slot
    ///
    /// The next [`get_pool`](Self::get_pool) builds a new pool.
    pub async fn shutdown(&self) {
        let pool = self.slot.lock().take();
        if let Some(pool) = pool {
            pool.close_all().await;
        }
    }
}

/// Process-wide HTTP connection pool
pub fn global_pool(settings: &PoolSettings) -> Arc<ConnectionPool<HttpConnector>> {
    GLOBAL_POOL.get_pool(settings)
}

/// Close the process-wide pool, if any
pub async fn shutdown_global_pool() {
    GLOBAL_POOL.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockConnector;

    fn mock_manager() -> PoolManager<MockConnector> {
        PoolManager::new(|_| MockConnector::new())
    }

    #[tokio::test]
    async fn test_first_settings_win() {
        let manager = mock_manager();
        let first = manager.get_pool(&PoolSettings {
            max_keepalive: 5,
            ..Default::default()
        });
        let second = manager.get_pool(&PoolSettings {
            max_keepalive: 50,
            ..Default::default()
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.settings().max_keepalive, 5);
    }

    #[tokio::test]
    async fn test_shutdown_resets_singleton() {
        let manager = mock_manager();
        let pool = manager.get_pool(&PoolSettings::default());
        let handle = pool.acquire("ep").await.unwrap();
        pool.release("ep", handle).await;

        manager.shutdown().await;

        assert!(manager.current().is_none());
        assert_eq!(pool.get_stats().active_connections, 0);
        assert_eq!(pool.connector().closed_count(), 1);

        let rebuilt = manager.get_pool(&PoolSettings {
            max_keepalive: 3,
            ..Default::default()
        });
        assert!(!Arc::ptr_eq(&pool, &rebuilt));
        assert_eq!(rebuilt.settings().max_keepalive, 3);
    }

    #[tokio::test]
    async fn test_global_pool_lifecycle() {
        let pool = global_pool(&PoolSettings::default());
        let again = global_pool(&PoolSettings {
            max_keepalive: 1,
            ..Default::default()
        });
        assert!(Arc::ptr_eq(&pool, &again));

        let session = pool.acquire("https://api.example.com").await.unwrap();
        assert_eq!(session.endpoint(), "https://api.example.com");
        pool.release("https://api.example.com", session).await;

        shutdown_global_pool().await;
        assert_eq!(pool.get_stats().pools_count, 0);
    }
}
