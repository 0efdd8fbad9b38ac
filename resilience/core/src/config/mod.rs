//! TOML Configuration File Support
//!
//! Loads pool and fallback settings from
//! `~/.config/llm-resilience/resilience.toml` and the environment. Embedding
//! applications that build [`PoolSettings`] and [`FallbackConfig`] in code
//! do not need this module.
//!
//! # Configuration Priority
//!
//! Values are applied in this order (later wins):
//! 1. Default values
//! 2. TOML configuration file
//! 3. Environment variables
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/llm-resilience/resilience.toml`
//!   (typically `~/.config/llm-resilience/resilience.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [pool]
//! max_connections = 100
//! max_keepalive = 20
//! timeout_ms = 30000
//!
//! [fallback]
//! enabled = true
//! max_attempts = 3
//! fallback_models = ["claude-3", "gpt-3.5"]
//! strategy_type = "priority"
//! base_delay_ms = 1000
//! max_delay_ms = 60000
//! fallback_on_status_codes = [429, 500, 502, 503]
//!
//! [fallback.error_mappings]
//! TimeoutError = ["fast-model"]
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `RESILIENCE_FALLBACK_ENABLED` | `fallback.enabled` (`0`/`false` disable) |
//! | `RESILIENCE_MAX_ATTEMPTS` | `fallback.max_attempts` |
//! | `RESILIENCE_FALLBACK_MODELS` | `fallback.fallback_models` (comma-separated) |
//! | `RESILIENCE_STRATEGY` | `fallback.strategy_type` |
//! | `RESILIENCE_MAX_KEEPALIVE` | `pool.max_keepalive` |
//! | `RESILIENCE_MAX_CONNECTIONS` | `pool.max_connections` |
//! | `RESILIENCE_POOL_TIMEOUT_MS` | `pool.timeout_ms` |

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fallback::{FallbackConfig, StrategyKind};
use crate::pool::PoolSettings;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the effective configuration last came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Pool section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolToml {
    /// Socket cap per HTTP session
    pub max_connections: Option<usize>,

    /// Idle entries kept per endpoint
    pub max_keepalive: Option<usize>,

    /// Request timeout in milliseconds
    pub timeout_ms: Option<u64>,

    /// Maximum entry age in milliseconds
    pub max_lifetime_ms: Option<u64>,

    /// Maximum idle time in milliseconds
    pub max_idle_ms: Option<u64>,
}

/// Fallback section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackToml {
    /// Master switch
    pub enabled: Option<bool>,

    /// Attempts per call, primary included
    pub max_attempts: Option<u32>,

    /// Ordered fallback candidates
    pub fallback_models: Option<Vec<String>>,

    /// Strategy name
    pub strategy_type: Option<String>,

    /// Error class -> candidate order
    pub error_mappings: Option<HashMap<String, Vec<String>>>,

    /// Initial backoff in milliseconds
    pub base_delay_ms: Option<u64>,

    /// Backoff cap in milliseconds
    pub max_delay_ms: Option<u64>,

    /// Backoff multiplier
    pub exponential_base: Option<f64>,

    /// Randomise delays
    pub jitter: Option<bool>,

    /// Status codes that allow fallback
    pub fallback_on_status_codes: Option<Vec<u16>>,

    /// Error classes that allow fallback
    pub fallback_on_errors: Option<Vec<String>>,

    /// Sessions kept in memory (0 = unbounded)
    pub max_session_history: Option<usize>,

    /// Opaque per-provider settings
    pub provider_config: Option<HashMap<String, toml::Value>>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceToml {
    /// Pool configuration section
    pub pool: PoolToml,

    /// Fallback configuration section
    pub fallback: FallbackToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective pool and fallback configuration
#[derive(Clone, Debug)]
pub struct ResilienceConfig {
    /// Pool limits
    pub pool: PoolSettings,

    /// Fallback policy
    pub fallback: FallbackConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            fallback: FallbackConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ResilienceConfig {
    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fallback = &self.fallback;
        if fallback.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "fallback.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(fallback.exponential_base.is_finite() && fallback.exponential_base >= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "fallback.exponential_base must be >= 1.0, got {}",
                fallback.exponential_base
            )));
        }
        if fallback.base_delay_ms > fallback.max_delay_ms {
            return Err(ConfigError::ValidationError(format!(
                "fallback.base_delay_ms ({}) exceeds fallback.max_delay_ms ({})",
                fallback.base_delay_ms, fallback.max_delay_ms
            )));
        }
        fallback
            .strategy_type
            .parse::<StrategyKind>()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.pool.max_keepalive == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_keepalive must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/llm-resilience/resilience.toml` or
/// `~/.config/llm-resilience/resilience.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("llm-resilience").join("resilience.toml"))
}

/// Load configuration from the default path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// result fails validation. A missing file is not an error.
pub fn load_config() -> Result<ResilienceConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or the result
/// fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ResilienceConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with<F>(path: Option<PathBuf>, env: F) -> Result<ResilienceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ResilienceConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ResilienceToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ResilienceConfig, toml: &ResilienceToml) {
    let pool = &mut config.pool;
    if let Some(max) = toml.pool.max_connections {
        pool.max_connections = max;
    }
    if let Some(max) = toml.pool.max_keepalive {
        pool.max_keepalive = max;
    }
    if let Some(ms) = toml.pool.timeout_ms {
        pool.timeout_ms = ms;
    }
    if let Some(ms) = toml.pool.max_lifetime_ms {
        pool.max_lifetime_ms = ms;
    }
    if let Some(ms) = toml.pool.max_idle_ms {
        pool.max_idle_ms = ms;
    }

    let fallback = &mut config.fallback;
    let section = &toml.fallback;
    if let Some(enabled) = section.enabled {
        fallback.enabled = enabled;
    }
    if let Some(n) = section.max_attempts {
        fallback.max_attempts = n;
    }
    if let Some(ref models) = section.fallback_models {
        fallback.fallback_models = models.clone();
    }
    if let Some(ref strategy) = section.strategy_type {
        fallback.strategy_type = strategy.clone();
    }
    if let Some(ref mappings) = section.error_mappings {
        fallback.error_mappings = mappings.clone();
    }
    if let Some(ms) = section.base_delay_ms {
        fallback.base_delay_ms = ms;
    }
    if let Some(ms) = section.max_delay_ms {
        fallback.max_delay_ms = ms;
    }
    if let Some(base) = section.exponential_base {
        fallback.exponential_base = base;
    }
    if let Some(jitter) = section.jitter {
        fallback.jitter = jitter;
    }
    if let Some(ref codes) = section.fallback_on_status_codes {
        fallback.fallback_on_status_codes = codes.clone();
    }
    if let Some(ref errors) = section.fallback_on_errors {
        fallback.fallback_on_errors = errors.clone();
    }
    if let Some(max) = section.max_session_history {
        fallback.max_session_history = (max > 0).then_some(max);
    }
    if let Some(ref providers) = section.provider_config {
        for (name, value) in providers {
            match serde_json::to_value(value) {
                Ok(json) => {
                    fallback.provider_config.insert(name.clone(), json);
                }
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "Skipping provider config");
                }
            }
        }
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ResilienceConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(enabled) = env("RESILIENCE_FALLBACK_ENABLED") {
        config.fallback.enabled = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Some(attempts) = env("RESILIENCE_MAX_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.fallback.max_attempts = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(models) = env("RESILIENCE_FALLBACK_MODELS") {
        config.fallback.fallback_models = models
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(ToString::to_string)
            .collect();
        config.source = ConfigSource::Env;
    }
    if let Some(strategy) = env("RESILIENCE_STRATEGY") {
        config.fallback.strategy_type = strategy;
        config.source = ConfigSource::Env;
    }

    if let Some(keepalive) = env("RESILIENCE_MAX_KEEPALIVE") {
        if let Ok(n) = keepalive.parse::<usize>() {
            config.pool.max_keepalive = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(max) = env("RESILIENCE_MAX_CONNECTIONS") {
        if let Ok(n) = max.parse::<usize>() {
            config.pool.max_connections = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(timeout) = env("RESILIENCE_POOL_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.pool.timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = load_config_with(None, no_env).unwrap();

        assert_eq!(config.pool, PoolSettings::default());
        assert_eq!(config.fallback.max_attempts, 3);
        assert_eq!(config.fallback.strategy_type, "sequential");
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("llm-resilience"));
            assert!(p.to_string_lossy().ends_with("resilience.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[pool]
max_connections = 50
max_keepalive = 5
timeout_ms = 10000

[fallback]
max_attempts = 4
fallback_models = ["claude-3", "gpt-3.5"]
strategy_type = "error_type"
base_delay_ms = 250
max_delay_ms = 5000
jitter = false
fallback_on_status_codes = [429, 503]
max_session_history = 0

[fallback.error_mappings]
TimeoutError = ["fast-model"]

[fallback.provider_config.openai]
organization = "org-123"
"#,
        );

        let config = load_config_with(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.pool.max_connections, 50);
        assert_eq!(config.pool.max_keepalive, 5);
        assert_eq!(config.pool.timeout_ms, 10_000);

        let fallback = &config.fallback;
        assert_eq!(fallback.max_attempts, 4);
        assert_eq!(fallback.fallback_models, vec!["claude-3", "gpt-3.5"]);
        assert_eq!(fallback.strategy_type, "error_type");
        assert_eq!(fallback.base_delay_ms, 250);
        assert!(!fallback.jitter);
        assert_eq!(fallback.fallback_on_status_codes, vec![429, 503]);
        assert_eq!(fallback.max_session_history, None);
        assert_eq!(
            fallback.error_mappings.get("TimeoutError"),
            Some(&vec!["fast-model".to_string()])
        );
        assert_eq!(
            fallback.provider_config["openai"]["organization"],
            serde_json::json!("org-123")
        );
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml(
            r#"
[fallback]
fallback_models = ["m2"]
"#,
        );

        let config = load_config_with(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.fallback.fallback_models, vec!["m2"]);
        assert_eq!(config.fallback.max_attempts, 3);
        assert_eq!(config.pool.max_keepalive, 20);
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/resilience.toml");
        let config = load_config_with(Some(path), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml(
            r#"
[fallback
max_attempts = "three"
"#,
        );

        let result = load_config_with(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    // =========================================================================
    // Priority Ordering Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml(
            r#"
[pool]
max_keepalive = 5

[fallback]
max_attempts = 4
fallback_models = ["file-model"]
"#,
        );
        let env = env_from(&[
            ("RESILIENCE_MAX_ATTEMPTS", "2"),
            ("RESILIENCE_FALLBACK_MODELS", "env-a, env-b,,"),
            ("RESILIENCE_FALLBACK_ENABLED", "false"),
            ("RESILIENCE_POOL_TIMEOUT_MS", "1500"),
        ]);

        let config = load_config_with(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.fallback.max_attempts, 2);
        assert_eq!(config.fallback.fallback_models, vec!["env-a", "env-b"]);
        assert!(!config.fallback.enabled);
        assert_eq!(config.pool.timeout_ms, 1500);
        // From the file, untouched by env
        assert_eq!(config.pool.max_keepalive, 5);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparseable_env_ignored() {
        let env = env_from(&[("RESILIENCE_MAX_KEEPALIVE", "lots")]);
        let config = load_config_with(None, env).unwrap();
        assert_eq!(config.pool.max_keepalive, 20);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validation_rejects_bad_values() {
        for (toml_content, needle) in [
            ("[fallback]\nmax_attempts = 0", "max_attempts"),
            ("[fallback]\nexponential_base = 0.5", "exponential_base"),
            (
                "[fallback]\nbase_delay_ms = 5000\nmax_delay_ms = 100",
                "base_delay_ms",
            ),
            ("[fallback]\nstrategy_type = \"weighted\"", "weighted"),
            ("[pool]\nmax_keepalive = 0", "max_keepalive"),
        ] {
            let file = write_toml(toml_content);
            let err = load_config_with(Some(file.path().to_path_buf()), no_env).unwrap_err();
            assert!(
                matches!(err, ConfigError::ValidationError(ref msg) if msg.contains(needle)),
                "{toml_content}: {err}"
            );
        }
    }

    #[test]
    fn test_env_strategy_validated() {
        let env = env_from(&[("RESILIENCE_STRATEGY", "round_robin")]);
        assert!(matches!(
            load_config_with(None, env),
            Err(ConfigError::ValidationError(_))
        ));
    }

    // =========================================================================
    // Display Tests
    // =========================================================================

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::Env), "environment");
        assert_eq!(format!("{}", ConfigSource::File), "config file");
        assert_eq!(format!("{}", ConfigSource::Default), "default");
    }

    #[test]
    fn test_config_error_display() {
        let read_err = ConfigError::ReadError {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = format!("{read_err}");
        assert!(msg.contains("/test/path"));
        assert!(msg.contains("Failed to read"));
    }

    #[test]
    fn test_toml_serializes_back() {
        let original = ResilienceToml {
            pool: PoolToml {
                max_keepalive: Some(7),
                ..Default::default()
            },
            fallback: FallbackToml {
                fallback_models: Some(vec!["m2".into()]),
                ..Default::default()
            },
        };

        let parsed: ResilienceToml = toml::from_str(&toml::to_string(&original).unwrap()).unwrap();
        assert_eq!(parsed.pool.max_keepalive, Some(7));
        assert_eq!(parsed.fallback.fallback_models, Some(vec!["m2".to_string()]));
    }
}
