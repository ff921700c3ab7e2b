use config::ObservabilityConfig;
use errors::ServiceError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber. `RUST_LOG` takes precedence over
/// `logging_level`.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), ServiceError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging_level))
        .map_err(|e| ServiceError::Configuration {
            message: format!("invalid logging level {}: {e}", config.logging_level)
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.log_format == "json" {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.map_err(|e| ServiceError::Configuration {
        message: format!("tracing subscriber already installed: {e}")
    })
}
