//! Multi-Provider Fallback
//!
//! Makes one logical model call survive provider failures by cascading
//! through alternative models.
//!
//! # Architecture
//!
//! ```text
//! +-------------------+
//! |  FallbackManager  |  <-- generate_with_fallback(request, primary)
//! +---------+---------+
//!           |
//!     +-----+------------------+--------------------+
//!     |                        |                    |
//!     v                        v                    v
//! +------------------+  +---------------+  +----------------+
//! | FallbackStrategy |  | ClientFactory |  | FallbackLogger |
//! | target/delay/    |  | one client    |  | attempt/       |
//! | should_fallback  |  | per attempt   |  | success/failure|
//! +------------------+  +---------------+  +----------------+
//!           |
//!           v
//!   FallbackSession { attempts: [FallbackAttempt, ...] }
//! ```
//!
//! Individual attempt failures ([`ProviderError`]) stay inside the cascade
//! and its session record. Only [`FallbackError`] reaches the caller.

pub mod config;
pub mod error;
pub mod logger;
pub mod manager;
pub mod session;
pub mod strategy;

pub use config::{FallbackConfig, DEFAULT_MAX_SESSION_HISTORY};
pub use error::{FallbackError, ProviderError};
pub use logger::{FallbackLogEntry, FallbackLogger, TracingFallbackLogger};
pub use manager::{FallbackManager, FallbackStats};
pub use session::{FallbackAttempt, FallbackSession};
pub use strategy::{
    create_fallback_strategy, ErrorTypeBasedStrategy, FallbackStrategy, PriorityFallbackStrategy,
    RandomFallbackStrategy, SequentialFallbackStrategy, StrategyKind,
};
