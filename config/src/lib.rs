//! # Configuration System
//!
//! Centralized configuration for the access control decision service.
//!
//! This crate provides:
//! - Configuration structures for stores, cache, attributes and connectors
//! - Environment variable loading (12-factor app principles)
//! - Configuration file loading (TOML/YAML)
//! - Configuration validation
//! - Hot reload functionality

pub mod config;
pub mod file_loader;
pub mod hot_reload;
pub mod loader;
pub mod validation;

pub use config::{
    AttributesConfig, BreakerConfig, CacheConfig, Config, ConnectorsConfig, ObservabilityConfig,
    PostgresConfig, ProviderConfig, RedisConfig
};
pub use file_loader::{
    ConfigFileError, load_and_validate, load_from_file, load_from_toml, load_from_yaml
};
pub use hot_reload::{ConfigReloadEvent, watch_config};
pub use loader::load_from_env;
pub use validation::{describe, validate};
