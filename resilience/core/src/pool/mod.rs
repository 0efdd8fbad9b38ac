//! Connection Pooling
//!
//! Reusable network-session handles keyed by endpoint.
//!
//! # Architecture
//!
//! ```text
//! +---------------+
//! |  PoolManager  |  <-- process-wide lazily-built pool
//! +-------+-------+
//!         |
//!         v
//! +----------------+      +-----------+
//! | ConnectionPool | ---> | Connector |  <-- opens / closes handles
//! +-------+--------+      +-----------+
//!         |
//!    +----+----+
//!    |    |    |
//!    v    v    v
//!  bucket per endpoint (LIFO idle entries)
//! ```

pub mod connection;
pub mod connection_pool;
pub mod manager;

pub use connection::{
    Connector, HttpConnector, HttpSession, PoolSettings, PooledEntry, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_IDLE, DEFAULT_MAX_KEEPALIVE, DEFAULT_MAX_LIFETIME,
};
pub use connection_pool::{ConnectionPool, PoolError, PoolStats};
pub use manager::{global_pool, shutdown_global_pool, PoolManager};
