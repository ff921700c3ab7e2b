//! # Configuration Validation
//!
//! Validation entry point and a flattened, human-readable report used by the
//! `acs config validate` command.

use crate::config::Config;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Validate configuration structure.
///
/// ## Validation Rules
/// ### Redis
/// - `port`: 1-65535
/// - `decision_db`, `marker_db`: 0-15 and distinct
///
/// ### PostgreSQL
/// - `host`: 1-255 characters
/// - `pool_size`: 1-100
///
/// ### Cache
/// - `backend`: "memory" or "redis"
/// - `breaker.failure_threshold_percent`: 0-100
///
/// ### Attributes
/// - `traversal_limit`: 1-100000
/// - `backend`: "memory" or "postgres"
///
/// ### Connectors
/// - intervals: 0-10080 minutes when present
///
/// ### Observability
/// - `logging_level`: trace, debug, info, warn or error
/// - `log_format`: plain or json
pub fn validate(config: &Config) -> Result<(), ValidationErrors> {
    config.validate()
}

/// Flattens nested validation errors into `section.field: code` lines.
pub fn describe(errors: &ValidationErrors) -> Vec<String> {
    let mut lines = Vec::new();
    collect(errors, "", &mut lines);
    lines.sort();
    lines
}

fn collect(errors: &ValidationErrors, prefix: &str, lines: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for e in field_errors {
                    lines.push(format!("{path}: {}", e.code));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect(nested, &path, lines),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect(nested, &format!("{path}[{index}]"), lines);
                }
            }
        }
    }
}
