//! # Environment Variable Loader
//!
//! Loads configuration from environment variables following 12-factor app
//! principles.
//!
//! # Naming Convention
//! - `RD_*`: Redis settings
//! - `PG_*`: PostgreSQL settings
//! - `AC_*`: Decision cache settings
//! - `AT_*`: Attribute store settings
//! - `CN_*`: Attribute connector settings
//! - `OB_*`: Observability settings

use crate::config::{
    AttributesConfig, BreakerConfig, CacheConfig, Config, ConnectorsConfig, ObservabilityConfig,
    PostgresConfig, ProviderConfig, RedisConfig
};
use std::env;

/// Load configuration from environment variables.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Every variable is optional; unset variables keep the documented default.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_env()?;
///     println!("Cache backend: {}", config.cache.backend);
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables
/// ### Redis Settings (`RD_*`)
/// - `RD_HOST`, `RD_PORT`, `RD_DECISION_DB`, `RD_MARKER_DB`,
///   `RD_TIMEOUT_SECONDS`
///
/// ### PostgreSQL Settings (`PG_*`)
/// - `PG_HOST`, `PG_PORT`, `PG_DATABASE`, `PG_USERNAME`, `PG_PASSWORD`,
///   `PG_POOL_SIZE`, `PG_TIMEOUT_SECONDS`
///
/// ### Decision Cache Settings (`AC_*`)
/// - `AC_ENABLED`: Enable caching (true/false, default: true)
/// - `AC_BACKEND`: memory/redis (default: memory)
/// - `AC_BREAKER_FAILURE_THRESHOLD_PERCENT`, `AC_BREAKER_WINDOW_DURATION_SECS`,
///   `AC_BREAKER_MIN_REQUESTS_IN_WINDOW`, `AC_BREAKER_RECOVERY_TIMEOUT_SECS`,
///   `AC_BREAKER_HALF_OPEN_MAX_REQUESTS`
///
/// ### Attribute Store Settings (`AT_*`)
/// - `AT_TRAVERSAL_LIMIT`: Maximum traversal nodes (default: 256)
/// - `AT_BACKEND`: memory/postgres (default: memory)
/// - `AT_CONTENTION_RETRY_ATTEMPTS` (default: 3)
/// - `AT_CONTENTION_RETRY_DELAY_MS` (default: 20)
///
/// ### Connector Settings (`CN_*`)
/// - `CN_RESOURCE_MAX_CACHED_INTERVAL_MINUTES`: configures the resource
///   connector when set
/// - `CN_SUBJECT_MAX_CACHED_INTERVAL_MINUTES`: configures the subject
///   connector when set
///
/// ### Observability Settings (`OB_*`)
/// - `OB_METRICS_ENABLED`, `OB_LOGGING_LEVEL`, `OB_LOG_FORMAT`
pub fn load_from_env() -> Result<Config, Box<dyn std::error::Error>> {
    let config = Config {
        providers: load_provider_from_env()?,
        cache: load_cache_from_env()?,
        attributes: load_attributes_from_env()?,
        connectors: load_connectors_from_env()?,
        observability: load_observability_from_env()?
    };

    Ok(config)
}

fn load_provider_from_env() -> Result<ProviderConfig, Box<dyn std::error::Error>> {
    Ok(ProviderConfig {
        redis: load_redis_from_env()?,
        postgres: load_postgres_from_env()?
    })
}

fn load_redis_from_env() -> Result<RedisConfig, Box<dyn std::error::Error>> {
    let defaults = RedisConfig::default();
    Ok(RedisConfig {
        host: env::var("RD_HOST").unwrap_or(defaults.host),
        port: parse_env_or("RD_PORT", defaults.port)?,
        decision_db: parse_env_or("RD_DECISION_DB", defaults.decision_db)?,
        marker_db: parse_env_or("RD_MARKER_DB", defaults.marker_db)?,
        timeout_seconds: parse_env_or("RD_TIMEOUT_SECONDS", defaults.timeout_seconds)?
    })
}

fn load_postgres_from_env() -> Result<PostgresConfig, Box<dyn std::error::Error>> {
    let defaults = PostgresConfig::default();
    Ok(PostgresConfig {
        host: env::var("PG_HOST").unwrap_or(defaults.host),
        port: parse_env_or("PG_PORT", defaults.port)?,
        database: env::var("PG_DATABASE").unwrap_or(defaults.database),
        username: env::var("PG_USERNAME").unwrap_or(defaults.username),
        password: env::var("PG_PASSWORD").unwrap_or_default(),
        pool_size: parse_env_or("PG_POOL_SIZE", defaults.pool_size)?,
        timeout_seconds: parse_env_or("PG_TIMEOUT_SECONDS", defaults.timeout_seconds)?
    })
}

fn load_cache_from_env() -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let defaults = CacheConfig::default();
    let breaker = BreakerConfig::default();
    Ok(CacheConfig {
        enabled: parse_env_or("AC_ENABLED", defaults.enabled)?,
        backend: env::var("AC_BACKEND").unwrap_or(defaults.backend),
        breaker: BreakerConfig {
            failure_threshold_percent: parse_env_or(
                "AC_BREAKER_FAILURE_THRESHOLD_PERCENT",
                breaker.failure_threshold_percent
            )?,
            window_duration_secs: parse_env_or(
                "AC_BREAKER_WINDOW_DURATION_SECS",
                breaker.window_duration_secs
            )?,
            min_requests_in_window: parse_env_or(
                "AC_BREAKER_MIN_REQUESTS_IN_WINDOW",
                breaker.min_requests_in_window
            )?,
            recovery_timeout_secs: parse_env_or(
                "AC_BREAKER_RECOVERY_TIMEOUT_SECS",
                breaker.recovery_timeout_secs
            )?,
            half_open_max_requests: parse_env_or(
                "AC_BREAKER_HALF_OPEN_MAX_REQUESTS",
                breaker.half_open_max_requests
            )?
        }
    })
}

fn load_attributes_from_env() -> Result<AttributesConfig, Box<dyn std::error::Error>> {
    let defaults = AttributesConfig::default();
    Ok(AttributesConfig {
        traversal_limit: parse_env_or("AT_TRAVERSAL_LIMIT", defaults.traversal_limit)?,
        backend: env::var("AT_BACKEND").unwrap_or(defaults.backend),
        contention_retry_attempts: parse_env_or(
            "AT_CONTENTION_RETRY_ATTEMPTS",
            defaults.contention_retry_attempts
        )?,
        contention_retry_delay_ms: parse_env_or(
            "AT_CONTENTION_RETRY_DELAY_MS",
            defaults.contention_retry_delay_ms
        )?
    })
}

fn load_connectors_from_env() -> Result<ConnectorsConfig, Box<dyn std::error::Error>> {
    Ok(ConnectorsConfig {
        resource_max_cached_interval_minutes: parse_optional_env(
            "CN_RESOURCE_MAX_CACHED_INTERVAL_MINUTES"
        )?,
        subject_max_cached_interval_minutes: parse_optional_env(
            "CN_SUBJECT_MAX_CACHED_INTERVAL_MINUTES"
        )?
    })
}

fn load_observability_from_env() -> Result<ObservabilityConfig, Box<dyn std::error::Error>> {
    let defaults = ObservabilityConfig::default();
    Ok(ObservabilityConfig {
        metrics_enabled: parse_env_or("OB_METRICS_ENABLED", defaults.metrics_enabled)?,
        logging_level: env::var("OB_LOGGING_LEVEL").unwrap_or(defaults.logging_level),
        log_format: env::var("OB_LOG_FORMAT").unwrap_or(defaults.log_format)
    })
}

fn parse_env<T>(key: &str) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static
{
    match env::var(key) {
        Ok(s) => s
            .parse::<T>()
            .map_err(|e| format!("{key}: {e}").into()),
        Err(e) => Err(Box::new(e) as Box<dyn std::error::Error>)
    }
}

/// Unset keeps the default; set but unparseable is an error rather than a
/// silent fallback.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static
{
    if env::var_os(key).is_none() {
        return Ok(default);
    }
    parse_env(key)
}

fn parse_optional_env<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static
{
    if env::var_os(key).is_none() {
        return Ok(None);
    }
    parse_env(key).map(Some)
}
