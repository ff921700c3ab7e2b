//! Resilience wrapper around a [`DecisionCache`].
//!
//! Reads and writes fail open: an engine error is logged and turned into a
//! miss or a no-op, and repeated backing-store failures open the breaker so
//! those calls stop reaching the store for a while. Invalidations fail
//! closed: they always reach the engine and their errors always propagate.
//!
//! Disabling caching turns reads into misses and writes into no-ops.
//! Invalidations still reach the engine so that re-enabling never serves a
//! decision revoked in the meantime.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use acs_core::types::{AttributeEntity, DecisionCacheEntry, PolicyEvaluationResult, ZoneId};
use async_trait::async_trait;
use config::BreakerConfig;
use errors::CacheError;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::breaker::CacheCircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::engine::DecisionCache;
use crate::key::DecisionCacheKey;
use crate::telemetry::CacheTelemetry;

pub struct CircuitBreakingDecisionCache {
    enabled: AtomicBool,
    engine: RwLock<Arc<dyn DecisionCache>>,
    breaker: CacheCircuitBreaker,
    telemetry: Arc<CacheTelemetry>
}

impl CircuitBreakingDecisionCache {
    pub fn new(engine: Arc<dyn DecisionCache>, enabled: bool, breaker: BreakerConfig) -> Self {
        Self::with_clock(engine, enabled, breaker, Arc::new(SystemClock))
    }

    pub fn with_clock(
        engine: Arc<dyn DecisionCache>,
        enabled: bool,
        breaker: BreakerConfig,
        clock: Arc<dyn Clock>
    ) -> Self {
        let telemetry = Arc::new(CacheTelemetry::new());
        Self {
            enabled: AtomicBool::new(enabled),
            engine: RwLock::new(engine),
            breaker: CacheCircuitBreaker::new(breaker, clock, telemetry.clone()),
            telemetry
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::AcqRel) != enabled {
            info!(enabled, "Decision caching toggled");
        }
    }

    /// Replaces the backing engine, returning the previous one.
    pub fn swap_engine(&self, engine: Arc<dyn DecisionCache>) -> Arc<dyn DecisionCache> {
        std::mem::replace(&mut *self.engine.write(), engine)
    }

    pub fn engine(&self) -> Arc<dyn DecisionCache> {
        self.engine.read().clone()
    }

    pub fn breaker(&self) -> &CacheCircuitBreaker {
        &self.breaker
    }

    async fn record_outcome<T>(&self, operation: &str, result: &Result<T, CacheError>) {
        match result {
            Ok(_) => self.breaker.record_success().await,
            Err(CacheError::Storage(_)) => self.breaker.record_failure(operation).await,
            // A corrupt entry says nothing about store health.
            Err(CacheError::Serialization { .. }) => {}
        }
        if let Err(e) = result {
            self.telemetry.record_fail_open(operation);
            warn!(operation, error = %e, "Decision cache call failed, continuing without cache");
        }
    }

    async fn fail_open(&self, operation: &str, result: Result<(), CacheError>) {
        self.record_outcome(operation, &result).await;
    }

    fn fail_closed(&self, operation: &str, zone_id: Option<&ZoneId>, result: Result<(), CacheError>) -> Result<(), CacheError> {
        result.map_err(|e| {
            self.telemetry.record_fail_closed(operation);
            error!(
                operation,
                zone_id = zone_id.map(ZoneId::as_str),
                error = %e,
                "Decision cache invalidation failed"
            );
            e
        })
    }
}

#[async_trait]
impl DecisionCache for CircuitBreakingDecisionCache {
    async fn get(&self, key: &DecisionCacheKey) -> Result<Option<DecisionCacheEntry>, CacheError> {
        if !self.is_enabled() || !self.breaker.is_allowed().await {
            return Ok(None);
        }
        let result = self.engine().get(key).await;
        self.record_outcome("get", &result).await;
        Ok(result.unwrap_or_default())
    }

    async fn set(&self, key: &DecisionCacheKey, result: PolicyEvaluationResult) -> Result<(), CacheError> {
        if !self.is_enabled() || !self.breaker.is_allowed().await {
            return Ok(());
        }
        let outcome = self.engine().set(key, result).await;
        self.fail_open("set", outcome).await;
        Ok(())
    }

    async fn set_resource_translations(
        &self,
        zone_id: &ZoneId,
        from_resource_id: &str,
        to_resource_ids: &BTreeSet<String>
    ) -> Result<(), CacheError> {
        if !self.is_enabled() || !self.breaker.is_allowed().await {
            return Ok(());
        }
        let outcome = self
            .engine()
            .set_resource_translations(zone_id, from_resource_id, to_resource_ids)
            .await;
        self.fail_open("set_resource_translations", outcome).await;
        Ok(())
    }

    async fn reset(&self, key: &DecisionCacheKey) -> Result<(), CacheError> {
        let outcome = self.engine().reset(key).await;
        self.fail_closed("reset", Some(&key.zone_id), outcome)
    }

    async fn reset_all(&self) -> Result<(), CacheError> {
        let outcome = self.engine().reset_all().await;
        self.fail_closed("reset_all", None, outcome)
    }

    async fn reset_for_subject(&self, zone_id: &ZoneId, subject_id: &str) -> Result<(), CacheError> {
        let outcome = self.engine().reset_for_subject(zone_id, subject_id).await;
        self.fail_closed("reset_for_subject", Some(zone_id), outcome)
    }

    async fn reset_for_resource(&self, zone_id: &ZoneId, resource_id: &str) -> Result<(), CacheError> {
        let outcome = self.engine().reset_for_resource(zone_id, resource_id).await;
        self.fail_closed("reset_for_resource", Some(zone_id), outcome)
    }

    async fn reset_for_policy_set(&self, zone_id: &ZoneId, policy_set_id: &str) -> Result<(), CacheError> {
        let outcome = self.engine().reset_for_policy_set(zone_id, policy_set_id).await;
        self.fail_closed("reset_for_policy_set", Some(zone_id), outcome)
    }

    async fn reset_for_subjects_by_ids(&self, zone_id: &ZoneId, subject_ids: &[String]) -> Result<(), CacheError> {
        let outcome = self.engine().reset_for_subjects_by_ids(zone_id, subject_ids).await;
        self.fail_closed("reset_for_subjects", Some(zone_id), outcome)
    }

    async fn reset_for_resources_by_ids(&self, zone_id: &ZoneId, resource_ids: &[String]) -> Result<(), CacheError> {
        let outcome = self.engine().reset_for_resources_by_ids(zone_id, resource_ids).await;
        self.fail_closed("reset_for_resources", Some(zone_id), outcome)
    }

    async fn reset_for_subjects(&self, zone_id: &ZoneId, subjects: &[AttributeEntity]) -> Result<(), CacheError> {
        let outcome = self.engine().reset_for_subjects(zone_id, subjects).await;
        self.fail_closed("reset_for_subjects", Some(zone_id), outcome)
    }

    async fn reset_for_resources(&self, zone_id: &ZoneId, resources: &[AttributeEntity]) -> Result<(), CacheError> {
        let outcome = self.engine().reset_for_resources(zone_id, resources).await;
        self.fail_closed("reset_for_resources", Some(zone_id), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acs_core::types::Effect;
    use errors::StorageError;
    use storage::InMemoryKeyValueStore;

    use crate::breaker::CircuitState;
    use crate::connector::StaticConnectorService;
    use crate::engine::DefaultDecisionCache;

    /// Engine whose every call fails with a storage error.
    struct BrokenEngine;

    fn outage() -> CacheError {
        CacheError::Storage(StorageError::ConnectionError {
            backend: "Redis".to_string(),
            reason: "connection refused".to_string()
        })
    }

    #[async_trait]
    impl DecisionCache for BrokenEngine {
        async fn get(&self, _: &DecisionCacheKey) -> Result<Option<DecisionCacheEntry>, CacheError> {
            Err(outage())
        }
        async fn set(&self, _: &DecisionCacheKey, _: PolicyEvaluationResult) -> Result<(), CacheError> {
            Err(outage())
        }
        async fn reset(&self, _: &DecisionCacheKey) -> Result<(), CacheError> {
            Err(outage())
        }
        async fn reset_all(&self) -> Result<(), CacheError> {
            Err(outage())
        }
        async fn reset_for_subject(&self, _: &ZoneId, _: &str) -> Result<(), CacheError> {
            Err(outage())
        }
        async fn reset_for_resource(&self, _: &ZoneId, _: &str) -> Result<(), CacheError> {
            Err(outage())
        }
        async fn reset_for_policy_set(&self, _: &ZoneId, _: &str) -> Result<(), CacheError> {
            Err(outage())
        }
        async fn reset_for_subjects_by_ids(&self, _: &ZoneId, _: &[String]) -> Result<(), CacheError> {
            Err(outage())
        }
        async fn reset_for_resources_by_ids(&self, _: &ZoneId, _: &[String]) -> Result<(), CacheError> {
            Err(outage())
        }
        async fn set_resource_translations(
            &self,
            _: &ZoneId,
            _: &str,
            _: &BTreeSet<String>
        ) -> Result<(), CacheError> {
            Err(outage())
        }
    }

    fn zone() -> ZoneId {
        ZoneId::new("zone1".to_string()).unwrap()
    }

    fn key() -> DecisionCacheKey {
        DecisionCacheKey::builder(zone())
            .subject("mulder")
            .resource("/x-files")
            .policy_sets(["p1"])
            .request("read")
            .build()
    }

    fn working_engine() -> Arc<dyn DecisionCache> {
        Arc::new(DefaultDecisionCache::new(
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(StaticConnectorService::none())
        ))
    }

    #[tokio::test]
    async fn test_reads_and_writes_fail_open() {
        let cache = CircuitBreakingDecisionCache::new(Arc::new(BrokenEngine), true, BreakerConfig::default());

        assert!(cache.get(&key()).await.unwrap().is_none());
        cache.set(&key(), PolicyEvaluationResult::new(Effect::Permit)).await.unwrap();
        cache.set_resource_translation(&zone(), "/x", "/v1/x").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidations_fail_closed() {
        let cache = CircuitBreakingDecisionCache::new(Arc::new(BrokenEngine), true, BreakerConfig::default());
        let ids = vec!["a".to_string()];
        let entities = vec![AttributeEntity::subject(zone(), "a")];

        assert!(cache.reset(&key()).await.is_err());
        assert!(cache.reset_all().await.is_err());
        assert!(cache.reset_for_subject(&zone(), "a").await.is_err());
        assert!(cache.reset_for_resource(&zone(), "/a").await.is_err());
        assert!(cache.reset_for_policy_set(&zone(), "p1").await.is_err());
        assert!(cache.reset_for_subjects_by_ids(&zone(), &ids).await.is_err());
        assert!(cache.reset_for_resources_by_ids(&zone(), &ids).await.is_err());
        assert!(cache.reset_for_subjects(&zone(), &entities).await.is_err());
        assert!(cache.reset_for_resources(&zone(), &entities).await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_cache_skips_reads_and_writes() {
        let cache = CircuitBreakingDecisionCache::new(working_engine(), false, BreakerConfig::default());
        cache.set(&key(), PolicyEvaluationResult::new(Effect::Permit)).await.unwrap();

        cache.set_enabled(true);
        assert!(cache.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_still_records_invalidations() {
        let cache = CircuitBreakingDecisionCache::new(working_engine(), true, BreakerConfig::default());
        cache.set(&key(), PolicyEvaluationResult::new(Effect::Permit)).await.unwrap();

        cache.set_enabled(false);
        cache.reset_for_subject(&zone(), "mulder").await.unwrap();
        cache.set_enabled(true);
        assert!(cache.get(&key()).await.unwrap().is_none());

        cache.swap_engine(Arc::new(BrokenEngine));
        cache.set_enabled(false);
        assert!(cache.reset_for_subject(&zone(), "mulder").await.is_err());
    }

    #[tokio::test]
    async fn test_swapping_engine_simulates_outage() {
        let cache = CircuitBreakingDecisionCache::new(working_engine(), true, BreakerConfig::default());
        cache.set(&key(), PolicyEvaluationResult::new(Effect::Permit)).await.unwrap();
        assert!(cache.get(&key()).await.unwrap().is_some());

        let healthy = cache.swap_engine(Arc::new(BrokenEngine));
        assert!(cache.get(&key()).await.unwrap().is_none());
        assert!(cache.reset_for_policy_set(&zone(), "p1").await.is_err());

        cache.swap_engine(healthy);
        assert!(cache.get(&key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_breaker_opens_on_read_failures_but_not_resets() {
        let config = BreakerConfig {
            failure_threshold_percent: 50.0,
            window_duration_secs: 60,
            min_requests_in_window: 2,
            recovery_timeout_secs: 60,
            half_open_max_requests: 1
        };
        let cache = CircuitBreakingDecisionCache::new(Arc::new(BrokenEngine), true, config);
        cache.get(&key()).await.unwrap();
        cache.get(&key()).await.unwrap();
        assert_eq!(cache.breaker().state().await, CircuitState::Open);

        cache.swap_engine(working_engine());
        // Open breaker skips the read path entirely.
        cache.set(&key(), PolicyEvaluationResult::new(Effect::Permit)).await.unwrap();
        assert!(cache.get(&key()).await.unwrap().is_none());
        // Invalidations still go through.
        assert!(cache.reset_for_subject(&zone(), "mulder").await.is_ok());
    }
}
