use std::collections::BTreeSet;
use std::sync::Arc;

use acs_core::traits::{AttributeConnectorService, KeyValueStore};
use acs_core::types::{AttributeEntity, DecisionCacheEntry, PolicyEvaluationResult, ZoneId};
use async_trait::async_trait;
use errors::CacheError;
use tracing::{debug, info};
use utils::parse_epoch_millis;

use crate::clock::{Clock, SystemClock};
use crate::key::{
    DecisionCacheKey, policy_set_marker_key, resource_marker_key, resource_translation_key,
    subject_marker_key
};
use crate::telemetry::{CacheTelemetry, StaleReason};

/// Decision cache with entity-level invalidation.
///
/// A cached decision stays valid until the subject, any resolved resource or
/// any policy set it depended on is reset after it was cached.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn get(&self, key: &DecisionCacheKey) -> Result<Option<DecisionCacheEntry>, CacheError>;

    async fn set(&self, key: &DecisionCacheKey, result: PolicyEvaluationResult) -> Result<(), CacheError>;

    /// Deletes one entry, or every entry matching a key with wildcard fields.
    async fn reset(&self, key: &DecisionCacheKey) -> Result<(), CacheError>;

    /// Drops every cached decision. Markers are kept.
    async fn reset_all(&self) -> Result<(), CacheError>;

    async fn reset_for_subject(&self, zone_id: &ZoneId, subject_id: &str) -> Result<(), CacheError>;

    /// Also resets every identifier `resource_id` translates to.
    async fn reset_for_resource(&self, zone_id: &ZoneId, resource_id: &str) -> Result<(), CacheError>;

    async fn reset_for_policy_set(&self, zone_id: &ZoneId, policy_set_id: &str) -> Result<(), CacheError>;

    async fn reset_for_subjects_by_ids(&self, zone_id: &ZoneId, subject_ids: &[String]) -> Result<(), CacheError>;

    async fn reset_for_resources_by_ids(&self, zone_id: &ZoneId, resource_ids: &[String]) -> Result<(), CacheError>;

    async fn reset_for_subjects(&self, zone_id: &ZoneId, subjects: &[AttributeEntity]) -> Result<(), CacheError> {
        let ids: Vec<String> = subjects.iter().map(|s| s.identifier.clone()).collect();
        self.reset_for_subjects_by_ids(zone_id, &ids).await
    }

    async fn reset_for_resources(&self, zone_id: &ZoneId, resources: &[AttributeEntity]) -> Result<(), CacheError> {
        let ids: Vec<String> = resources.iter().map(|r| r.identifier.clone()).collect();
        self.reset_for_resources_by_ids(zone_id, &ids).await
    }

    async fn set_resource_translation(
        &self,
        zone_id: &ZoneId,
        from_resource_id: &str,
        to_resource_id: &str
    ) -> Result<(), CacheError> {
        self.set_resource_translations(zone_id, from_resource_id, &BTreeSet::from([to_resource_id.to_string()]))
            .await
    }

    async fn set_resource_translations(
        &self,
        zone_id: &ZoneId,
        from_resource_id: &str,
        to_resource_ids: &BTreeSet<String>
    ) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Subject,
    Resource,
    PolicySet
}

/// The storage-agnostic cache engine.
///
/// Decisions and markers live in separate stores: flushing decisions must
/// never drop a marker.
pub struct DefaultDecisionCache {
    decisions: Arc<dyn KeyValueStore>,
    markers: Arc<dyn KeyValueStore>,
    connectors: Arc<dyn AttributeConnectorService>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<CacheTelemetry>
}

impl DefaultDecisionCache {
    pub fn new(
        decisions: Arc<dyn KeyValueStore>,
        markers: Arc<dyn KeyValueStore>,
        connectors: Arc<dyn AttributeConnectorService>
    ) -> Self {
        Self {
            decisions,
            markers,
            connectors,
            clock: Arc::new(SystemClock),
            telemetry: Arc::new(CacheTelemetry::new())
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<CacheTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Resource identifiers whose markers guard a decision. The requested
    /// identifier stands in when nothing was resolved, or when the single
    /// resolved URI is the requested one.
    fn guarded_resource_ids(key: &DecisionCacheKey, resolved: &BTreeSet<String>) -> Vec<String> {
        match (&key.resource_id, resolved.len()) {
            (Some(requested), 0) => vec![requested.clone()],
            (None, 0) => Vec::new(),
            (Some(requested), 1) if resolved.contains(requested) => vec![requested.clone()],
            _ => resolved.iter().cloned().collect()
        }
    }

    fn marker_keys(
        key: &DecisionCacheKey,
        resolved: &BTreeSet<String>
    ) -> (Vec<String>, Vec<MarkerKind>) {
        let zone = &key.zone_id;
        let mut keys = Vec::new();
        let mut kinds = Vec::new();

        if let Some(subject) = &key.subject_id {
            keys.push(subject_marker_key(zone, subject));
            kinds.push(MarkerKind::Subject);
        }
        for policy_set in key.policy_set_ids() {
            keys.push(policy_set_marker_key(zone, policy_set));
            kinds.push(MarkerKind::PolicySet);
        }
        for resource in Self::guarded_resource_ids(key, resolved) {
            keys.push(resource_marker_key(zone, &resource));
            kinds.push(MarkerKind::Resource);
        }
        (keys, kinds)
    }

    fn stale_reason(
        &self,
        entry: &DecisionCacheEntry,
        kinds: &[MarkerKind],
        values: &[Option<String>]
    ) -> Option<StaleReason> {
        let cached_at = entry.timestamp.timestamp_millis();
        let check = |kind: MarkerKind, value: &Option<String>| -> Option<StaleReason> {
            match value.as_deref().and_then(parse_epoch_millis) {
                None => Some(StaleReason::MissingMarker),
                Some(marked_at) if marked_at >= cached_at => Some(match kind {
                    MarkerKind::Subject => StaleReason::Subject,
                    MarkerKind::Resource => StaleReason::Resource,
                    MarkerKind::PolicySet => StaleReason::PolicySet
                }),
                Some(_) => None
            }
        };

        let markers = || kinds.iter().copied().zip(values.iter());
        if let Some(reason) = markers()
            .filter(|(kind, _)| *kind == MarkerKind::PolicySet)
            .find_map(|(kind, value)| check(kind, value))
        {
            return Some(reason);
        }

        let resource_connector = self.connectors.resource_attribute_connector();
        let subject_connector = self.connectors.subject_attribute_connector();
        if resource_connector.is_none() && subject_connector.is_none() {
            return markers()
                .filter(|(kind, _)| *kind != MarkerKind::PolicySet)
                .find_map(|(kind, value)| check(kind, value));
        }

        let age_minutes = (self.clock.now_ms() - cached_at) / 60_000;
        [resource_connector, subject_connector]
            .into_iter()
            .flatten()
            .any(|connector| age_minutes >= connector.max_cached_interval_minutes)
            .then_some(StaleReason::ConnectorInterval)
    }

    fn now_value(&self) -> String {
        self.clock.now_ms().to_string()
    }

    async fn bump(&self, kind: &str, zone_id: &ZoneId, marker_keys: Vec<String>) -> Result<(), CacheError> {
        if marker_keys.is_empty() {
            return Ok(());
        }
        let now = self.now_value();
        let count = marker_keys.len();
        let entries: Vec<(String, String)> = marker_keys.into_iter().map(|k| (k, now.clone())).collect();
        self.markers.multi_set(&entries).await?;
        self.telemetry.record_invalidation(kind, count);
        debug!(zone_id = %zone_id, kind, count, "Bumped invalidation markers");
        Ok(())
    }

    async fn translated_resource_ids(
        &self,
        zone_id: &ZoneId,
        resource_ids: &[String]
    ) -> Result<BTreeSet<String>, CacheError> {
        let mut all: BTreeSet<String> = resource_ids.iter().cloned().collect();
        for resource_id in resource_ids {
            all.extend(
                self.markers
                    .set_members(&resource_translation_key(zone_id, resource_id))
                    .await?
            );
        }
        Ok(all)
    }
}

#[async_trait]
impl DecisionCache for DefaultDecisionCache {
    async fn get(&self, key: &DecisionCacheKey) -> Result<Option<DecisionCacheEntry>, CacheError> {
        let decision_key = key.to_decision_key();
        let Some(raw) = self.decisions.get(&decision_key).await? else {
            self.telemetry.record_miss();
            debug!(key = %decision_key, "Decision cache miss");
            return Ok(None);
        };

        let entry: DecisionCacheEntry =
            serde_json::from_str(&raw).map_err(|e| CacheError::Serialization {
                key: decision_key.clone(),
                reason: e.to_string()
            })?;

        // Markers live in their own store and depend on the entry's resolved
        // URIs, so they are read after it in one batch. Markers only move
        // forward: a bump landing between the two reads is seen as stale,
        // never the reverse.
        let (marker_keys, kinds) = Self::marker_keys(key, entry.resolved_resource_uris());
        let values = if marker_keys.is_empty() {
            Vec::new()
        } else {
            self.markers.multi_get(&marker_keys).await?
        };

        if let Some(reason) = self.stale_reason(&entry, &kinds, &values) {
            self.decisions.delete(std::slice::from_ref(&decision_key)).await?;
            self.telemetry.record_stale(reason);
            debug!(key = %decision_key, reason = reason.as_str(), "Evicted stale decision");
            return Ok(None);
        }

        self.telemetry.record_hit();
        debug!(key = %decision_key, effect = %entry.effect(), "Decision cache hit");
        Ok(Some(entry))
    }

    async fn set(&self, key: &DecisionCacheKey, result: PolicyEvaluationResult) -> Result<(), CacheError> {
        let decision_key = key.to_decision_key();
        let (marker_keys, _) = Self::marker_keys(key, &result.resolved_resource_uris);
        // One millisecond before the entry, so only a later bump reads as newer.
        let baseline = (self.clock.now_ms() - 1).to_string();
        for marker_key in &marker_keys {
            self.markers.set_if_absent(marker_key, &baseline).await?;
        }

        let entry = DecisionCacheEntry {
            result,
            timestamp: self.clock.now()
        };
        let value = serde_json::to_string(&entry).map_err(|e| CacheError::Serialization {
            key: decision_key.clone(),
            reason: e.to_string()
        })?;
        self.decisions.set(&decision_key, &value).await?;
        debug!(key = %decision_key, effect = %entry.effect(), "Cached decision");
        Ok(())
    }

    async fn reset(&self, key: &DecisionCacheKey) -> Result<(), CacheError> {
        let decision_key = key.to_decision_key();
        let keys: Vec<String> = if key.is_pattern() {
            self.decisions.keys(&decision_key).await?.into_iter().collect()
        } else {
            vec![decision_key.clone()]
        };
        if !keys.is_empty() {
            self.decisions.delete(&keys).await?;
        }
        self.telemetry.record_invalidation("decision", keys.len());
        debug!(pattern = %decision_key, removed = keys.len(), "Reset cached decisions");
        Ok(())
    }

    async fn reset_all(&self) -> Result<(), CacheError> {
        self.decisions.flush_all().await?;
        self.telemetry.record_invalidation("all", 1);
        info!("Flushed all cached decisions");
        Ok(())
    }

    async fn reset_for_subject(&self, zone_id: &ZoneId, subject_id: &str) -> Result<(), CacheError> {
        self.bump("subject", zone_id, vec![subject_marker_key(zone_id, subject_id)])
            .await
    }

    async fn reset_for_resource(&self, zone_id: &ZoneId, resource_id: &str) -> Result<(), CacheError> {
        self.reset_for_resources_by_ids(zone_id, &[resource_id.to_string()])
            .await
    }

    async fn reset_for_policy_set(&self, zone_id: &ZoneId, policy_set_id: &str) -> Result<(), CacheError> {
        self.bump("policy_set", zone_id, vec![policy_set_marker_key(zone_id, policy_set_id)])
            .await
    }

    async fn reset_for_subjects_by_ids(&self, zone_id: &ZoneId, subject_ids: &[String]) -> Result<(), CacheError> {
        let keys = subject_ids
            .iter()
            .map(|id| subject_marker_key(zone_id, id))
            .collect();
        self.bump("subject", zone_id, keys).await
    }

    async fn reset_for_resources_by_ids(&self, zone_id: &ZoneId, resource_ids: &[String]) -> Result<(), CacheError> {
        let keys = self
            .translated_resource_ids(zone_id, resource_ids)
            .await?
            .iter()
            .map(|id| resource_marker_key(zone_id, id))
            .collect();
        self.bump("resource", zone_id, keys).await
    }

    async fn set_resource_translations(
        &self,
        zone_id: &ZoneId,
        from_resource_id: &str,
        to_resource_ids: &BTreeSet<String>
    ) -> Result<(), CacheError> {
        if to_resource_ids.is_empty() {
            return Ok(());
        }
        let members: Vec<String> = to_resource_ids.iter().cloned().collect();
        self.markers
            .add_to_set(&resource_translation_key(zone_id, from_resource_id), &members)
            .await?;
        debug!(
            zone_id = %zone_id,
            from = from_resource_id,
            to = ?to_resource_ids,
            "Recorded resource translation"
        );
        Ok(())
    }
}
