use metrics::{counter, gauge};

use crate::breaker::CircuitState;

/// Why a cached decision was judged stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    PolicySet,
    Subject,
    Resource,
    ConnectorInterval,
    MissingMarker
}

impl StaleReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PolicySet => "policy_set",
            Self::Subject => "subject",
            Self::Resource => "resource",
            Self::ConnectorInterval => "connector_interval",
            Self::MissingMarker => "missing_marker"
        }
    }
}

/// Metric recording for the decision cache.
#[derive(Debug, Default)]
pub struct CacheTelemetry;

impl CacheTelemetry {
    pub fn new() -> Self {
        Self
    }

    pub fn record_hit(&self) {
        counter!("acs_decision_cache_requests_total", "outcome" => "hit").increment(1);
    }

    pub fn record_miss(&self) {
        counter!("acs_decision_cache_requests_total", "outcome" => "miss").increment(1);
    }

    pub fn record_stale(&self, reason: StaleReason) {
        counter!("acs_decision_cache_requests_total", "outcome" => "stale").increment(1);
        counter!("acs_decision_cache_stale_total", "reason" => reason.as_str()).increment(1);
    }

    pub fn record_invalidation(&self, kind: &str, count: usize) {
        let labels = [("kind", kind.to_string())];
        counter!("acs_decision_cache_invalidations_total", &labels).increment(count as u64);
    }

    pub fn record_fail_open(&self, operation: &str) {
        let labels = [
            ("operation", operation.to_string()),
            ("path", "fail_open".to_string())
        ];
        counter!("acs_decision_cache_failures_total", &labels).increment(1);
    }

    pub fn record_fail_closed(&self, operation: &str) {
        let labels = [
            ("operation", operation.to_string()),
            ("path", "fail_closed".to_string())
        ];
        counter!("acs_decision_cache_failures_total", &labels).increment(1);
    }

    pub fn record_breaker_state(&self, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0
        };
        gauge!("acs_decision_cache_breaker_state").set(value);
    }
}
