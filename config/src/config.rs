//! # Configuration Structures
//!
//! This module defines all configuration structures for the access control
//! decision service.
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization
//! - Use `validator` for input validation
//! - Fall back to documented defaults for every omitted field

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Main configuration structure for the access control decision service.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Aggregates the storage providers, the decision cache, the hierarchical
/// attribute store, attribute connectors and observability settings.
///
/// ## Usage
/// ```rust,no_run
/// use config::Config;
///
/// let config = Config::default();
/// println!("Traversal limit: {}", config.attributes.traversal_limit);
/// ```
///
/// ## Validation
/// All nested configurations must pass their own validation rules.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Storage provider configurations (Redis, PostgreSQL)
    #[serde(default)]
    #[validate(nested)]
    pub providers: ProviderConfig,

    /// Decision cache configuration
    #[serde(default)]
    #[validate(nested)]
    pub cache: CacheConfig,

    /// Hierarchical attribute store configuration
    #[serde(default)]
    #[validate(nested)]
    pub attributes: AttributesConfig,

    /// External attribute connector configuration
    #[serde(default)]
    #[validate(nested)]
    pub connectors: ConnectorsConfig,

    /// Observability configuration (metrics, logging)
    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig
}

/// Storage provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct ProviderConfig {
    /// Redis backing store for decisions and invalidation markers
    #[serde(default)]
    #[validate(nested)]
    pub redis: RedisConfig,

    /// PostgreSQL store for attribute entities
    #[serde(default)]
    #[validate(nested)]
    pub postgres: PostgresConfig
}

/// Redis configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Connection settings for the decision cache backing store. Decisions and
/// invalidation markers live in separate logical databases so that flushing
/// or evicting decisions never touches markers.
///
/// ## Fields
/// - `host`: Redis server hostname (default: "localhost")
/// - `port`: Redis server port (default: 6379)
/// - `decision_db`: Database holding evictable decisions (default: 0)
/// - `marker_db`: Database holding markers and translations (default: 1)
/// - `timeout_seconds`: Connection timeout (default: 5, range: 1-300)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_redis_databases"))]
pub struct RedisConfig {
    /// Redis server hostname
    #[serde(default = "default_redis_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    /// Redis server port
    #[serde(default = "default_redis_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// Database number for decision entries
    #[serde(default = "default_redis_decision_db")]
    #[validate(range(min = 0, max = 15))]
    pub decision_db: u8,

    /// Database number for invalidation markers and resource translations
    #[serde(default = "default_redis_marker_db")]
    #[validate(range(min = 0, max = 15))]
    pub marker_db: u8,

    /// Connection timeout in seconds
    #[serde(default = "default_redis_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_seconds: u64
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_decision_db() -> u8 {
    0
}

fn default_redis_marker_db() -> u8 {
    1
}

fn default_redis_timeout() -> u64 {
    5
}

fn validate_redis_databases(config: &RedisConfig) -> Result<(), validator::ValidationError> {
    if config.decision_db == config.marker_db {
        return Err(validator::ValidationError::new(
            "decision_db and marker_db must differ"
        ));
    }
    Ok(())
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            decision_db: default_redis_decision_db(),
            marker_db: default_redis_marker_db(),
            timeout_seconds: default_redis_timeout()
        }
    }
}

impl RedisConfig {
    pub fn url_for_db(&self, db: u8) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, db)
    }
}

/// PostgreSQL configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Connection settings for the attribute-entity store.
///
/// ## Fields
/// - `host`: Database server hostname (default: "localhost")
/// - `port`: Database server port (default: 5432)
/// - `database`: Database name (default: "acs")
/// - `username`: Database user (default: "postgres")
/// - `password`: Database password (should come from `PG_PASSWORD`)
/// - `pool_size`: Maximum connections in pool (default: 10, range: 1-100)
/// - `timeout_seconds`: Connection timeout (default: 30, range: 1-300)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct PostgresConfig {
    /// Database server hostname
    #[serde(default = "default_postgres_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    /// Database server port
    #[serde(default = "default_postgres_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    /// Database name
    #[serde(default = "default_postgres_database")]
    #[validate(length(min = 1, max = 63))]
    pub database: String,

    /// Database username
    #[serde(default = "default_postgres_username")]
    #[validate(length(min = 1, max = 63))]
    pub username: String,

    /// Database password
    #[serde(default)]
    pub password: String,

    /// Maximum connections in pool
    #[serde(default = "default_postgres_pool_size")]
    #[validate(range(min = 1, max = 100))]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_postgres_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_seconds: u64
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "acs".to_string()
}

fn default_postgres_username() -> String {
    "postgres".to_string()
}

fn default_postgres_pool_size() -> u32 {
    10
}

fn default_postgres_timeout() -> u64 {
    30
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_postgres_host(),
            port: default_postgres_port(),
            database: default_postgres_database(),
            username: default_postgres_username(),
            password: String::new(),
            pool_size: default_postgres_pool_size(),
            timeout_seconds: default_postgres_timeout()
        }
    }
}

impl PostgresConfig {
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// Decision cache configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Fields
/// - `enabled`: Serve and store cached decisions (default: true). Can be
///   toggled at runtime through hot reload.
/// - `backend`: "memory" or "redis" (default: "memory")
/// - `breaker`: Failure-rate breaker guarding the read/write path
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_backend")]
    #[validate(custom(function = "validate_cache_backend"))]
    pub backend: String,

    #[serde(default)]
    #[validate(nested)]
    pub breaker: BreakerConfig
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_backend() -> String {
    "memory".to_string()
}

fn validate_cache_backend(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "memory" | "redis" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid cache backend"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            backend: default_cache_backend(),
            breaker: BreakerConfig::default()
        }
    }
}

/// Failure-rate breaker thresholds for the decision cache read/write path.
///
/// Invalidations are never short-circuited by the breaker.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct BreakerConfig {
    /// Failure percentage within a window that opens the breaker
    #[serde(default = "default_breaker_failure_threshold_percent")]
    #[validate(range(min = 0.0, max = 100.0))]
    pub failure_threshold_percent: f64,

    /// Length of the counting window in seconds
    #[serde(default = "default_breaker_window_duration_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub window_duration_secs: u64,

    /// Calls required in a window before the rate is considered
    #[serde(default = "default_breaker_min_requests_in_window")]
    #[validate(range(min = 1))]
    pub min_requests_in_window: u64,

    /// Time the breaker stays open before probing again
    #[serde(default = "default_breaker_recovery_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub recovery_timeout_secs: u64,

    /// Trial calls admitted while half-open
    #[serde(default = "default_breaker_half_open_max_requests")]
    #[validate(range(min = 1, max = 100))]
    pub half_open_max_requests: u64
}

fn default_breaker_failure_threshold_percent() -> f64 {
    50.0
}

fn default_breaker_window_duration_secs() -> u64 {
    60
}

fn default_breaker_min_requests_in_window() -> u64 {
    10
}

fn default_breaker_recovery_timeout_secs() -> u64 {
    30
}

fn default_breaker_half_open_max_requests() -> u64 {
    3
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold_percent: default_breaker_failure_threshold_percent(),
            window_duration_secs: default_breaker_window_duration_secs(),
            min_requests_in_window: default_breaker_min_requests_in_window(),
            recovery_timeout_secs: default_breaker_recovery_timeout_secs(),
            half_open_max_requests: default_breaker_half_open_max_requests()
        }
    }
}

/// Hierarchical attribute store configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Fields
/// - `traversal_limit`: Maximum nodes visited when resolving inherited
///   attributes (default: 256, range: 1-100000). Can be changed at runtime
///   through hot reload.
/// - `backend`: "memory" or "postgres" (default: "memory")
/// - `contention_retry_attempts`: Retries on lock contention (default: 3)
/// - `contention_retry_delay_ms`: Base backoff between retries (default: 20)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct AttributesConfig {
    #[serde(default = "default_attributes_traversal_limit")]
    #[validate(range(min = 1, max = 100_000))]
    pub traversal_limit: usize,

    #[serde(default = "default_attributes_backend")]
    #[validate(custom(function = "validate_attributes_backend"))]
    pub backend: String,

    #[serde(default = "default_attributes_contention_retry_attempts")]
    #[validate(range(min = 0, max = 10))]
    pub contention_retry_attempts: usize,

    #[serde(default = "default_attributes_contention_retry_delay_ms")]
    #[validate(range(min = 1, max = 5000))]
    pub contention_retry_delay_ms: u64
}

fn default_attributes_traversal_limit() -> usize {
    256
}

fn default_attributes_backend() -> String {
    "memory".to_string()
}

fn default_attributes_contention_retry_attempts() -> usize {
    3
}

fn default_attributes_contention_retry_delay_ms() -> u64 {
    20
}

fn validate_attributes_backend(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "memory" | "postgres" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid attributes backend"))
    }
}

impl Default for AttributesConfig {
    fn default() -> Self {
        Self {
            traversal_limit: default_attributes_traversal_limit(),
            backend: default_attributes_backend(),
            contention_retry_attempts: default_attributes_contention_retry_attempts(),
            contention_retry_delay_ms: default_attributes_contention_retry_delay_ms()
        }
    }
}

/// External attribute connector configuration.
///
/// A connector counts as configured when its interval is present. Decisions
/// are then bounded by age rather than by invalidation markers.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct ConnectorsConfig {
    #[serde(default)]
    #[validate(range(min = 0, max = 10080))]
    pub resource_max_cached_interval_minutes: Option<i64>,

    #[serde(default)]
    #[validate(range(min = 0, max = 10080))]
    pub subject_max_cached_interval_minutes: Option<i64>
}

/// Observability configuration.
///
/// ## Fields
/// - `metrics_enabled`: Record cache and traversal metrics (default: true)
/// - `logging_level`: trace, debug, info, warn or error (default: "info")
/// - `log_format`: "plain" or "json" (default: "plain")
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_observability_metrics_enabled")]
    pub metrics_enabled: bool,

    #[serde(default = "default_observability_logging_level")]
    #[validate(custom(function = "validate_logging_level"))]
    pub logging_level: String,

    #[serde(default = "default_observability_log_format")]
    #[validate(custom(function = "validate_log_format"))]
    pub log_format: String
}

fn default_observability_metrics_enabled() -> bool {
    true
}

fn default_observability_logging_level() -> String {
    "info".to_string()
}

fn default_observability_log_format() -> String {
    "plain".to_string()
}

fn validate_logging_level(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid logging level"))
    }
}

fn validate_log_format(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "plain" | "json" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid log format"))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_observability_metrics_enabled(),
            logging_level: default_observability_logging_level(),
            log_format: default_observability_log_format()
        }
    }
}
