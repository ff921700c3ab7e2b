//! # Configuration File Loading
//!
//! Loads configuration from TOML or YAML files.
//!
//! Supports automatic format detection based on file extension.

use crate::config::Config;
use std::path::Path;
use validator::Validate;

/// Configuration file loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(String),

    #[error("Config file has no extension")]
    NoExtension,

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors)
}

/// Load configuration from a TOML file.
///
/// Omitted sections and fields take their defaults.
pub fn load_from_toml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    toml::from_str(&contents).map_err(|e| ConfigFileError::TomlParse(e.to_string()))
}

/// Load configuration from a YAML file.
pub fn load_from_yaml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigFileError::YamlParse(e.to_string()))
}

/// Load configuration from file with auto-detection.
///
/// # M-CANONICAL-DOCS
///
/// ## Supported Formats
/// - `.toml`: TOML format
/// - `.yaml` / `.yml`: YAML format
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_file;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_file(Path::new("acs.yaml"))?;
///     Ok(())
/// }
/// ```
pub fn load_from_file(path: &Path) -> Result<Config, ConfigFileError> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or(ConfigFileError::NoExtension)?;

    match extension.to_lowercase().as_str() {
        "toml" => load_from_toml(path),
        "yaml" | "yml" => load_from_yaml(path),
        other => Err(ConfigFileError::UnsupportedFormat(other.to_string()))
    }
}

/// Load a file and reject it unless every section validates.
pub fn load_and_validate(path: &Path) -> Result<Config, ConfigFileError> {
    let config = load_from_file(path)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acs.toml");

        let toml_content = r#"
[providers.redis]
host = "redishost"
decision_db = 2
marker_db = 3

[cache]
enabled = false
backend = "redis"

[attributes]
traversal_limit = 64
backend = "postgres"

[connectors]
resource_max_cached_interval_minutes = 10

[observability]
logging_level = "debug"
"#;
        fs::write(&path, toml_content).unwrap();

        let config = load_from_toml(&path).unwrap();
        assert_eq!(config.providers.redis.host, "redishost");
        assert_eq!(config.providers.redis.marker_db, 3);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.backend, "redis");
        assert_eq!(config.attributes.traversal_limit, 64);
        assert_eq!(config.connectors.resource_max_cached_interval_minutes, Some(10));
        assert!(config.connectors.subject_max_cached_interval_minutes.is_none());
        assert_eq!(config.observability.logging_level, "debug");
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acs.yaml");

        let yaml_content = r#"
providers:
  postgres:
    host: pghost
    port: 5433
cache:
  breaker:
    failure_threshold_percent: 25.0
attributes:
  contention_retry_attempts: 5
"#;
        fs::write(&path, yaml_content).unwrap();

        let config = load_from_yaml(&path).unwrap();
        assert_eq!(config.providers.postgres.host, "pghost");
        assert_eq!(config.providers.postgres.port, 5433);
        assert!((config.cache.breaker.failure_threshold_percent - 25.0).abs() < f64::EPSILON);
        assert_eq!(config.attributes.contention_retry_attempts, 5);
        assert_eq!(config.attributes.traversal_limit, 256);
    }

    #[test]
    fn test_load_from_file_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acs.json");
        fs::write(&path, "{}").unwrap();

        let result = load_from_file(&path);
        assert!(matches!(result, Err(ConfigFileError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_load_from_file_no_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acs");
        fs::write(&path, "").unwrap();

        let result = load_from_file(&path);
        assert!(matches!(result, Err(ConfigFileError::NoExtension)));
    }

    #[test]
    fn test_load_from_file_auto_detect_yml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acs.yml");
        fs::write(&path, "attributes:\n  traversal_limit: 7\n").unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.attributes.traversal_limit, 7);
    }

    #[test]
    fn test_load_from_toml_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acs.toml");
        fs::write(&path, "[invalid\n").unwrap();

        let result = load_from_toml(&path);
        assert!(matches!(result, Err(ConfigFileError::TomlParse(_))));
    }

    #[test]
    fn test_load_from_toml_not_found() {
        let path = Path::new("/nonexistent/path/acs.toml");
        let result = load_from_toml(path);
        assert!(matches!(result, Err(ConfigFileError::FileNotFound(_))));
    }

    #[test]
    fn test_load_and_validate_rejects_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acs.toml");
        fs::write(&path, "[attributes]\ntraversal_limit = 0\n").unwrap();

        let result = load_and_validate(&path);
        assert!(matches!(result, Err(ConfigFileError::Invalid(_))));
    }
}
