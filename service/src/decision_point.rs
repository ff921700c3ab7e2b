use std::collections::BTreeSet;
use std::sync::Arc;

use acs_core::traits::PolicyEvaluator;
use acs_core::types::{Effect, EntityKind, EvaluationRequest, PolicyEvaluationResult};
use attributes::HierarchicalAttributeResolver;
use decision_cache::{DecisionCache, DecisionCacheKey};
use errors::ServiceError;
use tracing::{debug, warn};
use validator::Validate;

/// Read-through policy decision point.
///
/// Serves a cached decision when one is valid. Otherwise resolves the
/// inherited subject and resource attributes, asks the evaluator and caches
/// the answer unless it is `INDETERMINATE`. Resolved resource URIs that
/// differ from the requested one are recorded as translations of it.
pub struct CachedDecisionPoint {
    cache: Arc<dyn DecisionCache>,
    resolver: Arc<HierarchicalAttributeResolver>,
    evaluator: Arc<dyn PolicyEvaluator>
}

impl CachedDecisionPoint {
    pub fn new(
        cache: Arc<dyn DecisionCache>,
        resolver: Arc<HierarchicalAttributeResolver>,
        evaluator: Arc<dyn PolicyEvaluator>
    ) -> Self {
        Self {
            cache,
            resolver,
            evaluator
        }
    }

    pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<PolicyEvaluationResult, ServiceError> {
        request.validate().map_err(|e| ServiceError::Evaluation {
            reason: format!("invalid request: {e}")
        })?;
        let key = DecisionCacheKey::for_request(request);

        match self.cache.get(&key).await {
            Ok(Some(entry)) => {
                debug!(
                    zone_id = %request.zone_id,
                    subject = %request.subject_identifier,
                    resource = %request.resource_identifier,
                    "Serving cached decision"
                );
                return Ok(entry.result);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Decision cache read failed, evaluating"),
        }

        let zone = &request.zone_id;
        let subject = self
            .resolver
            .get_with_inherited_attributes(zone, EntityKind::Subject, &request.subject_identifier)
            .await?;
        let resource = self
            .resolver
            .get_with_inherited_attributes(zone, EntityKind::Resource, &request.resource_identifier)
            .await?;

        let result = self
            .evaluator
            .evaluate(request, subject.as_ref(), resource.as_ref())
            .await
            .map_err(|e| ServiceError::Evaluation {
                reason: e.to_string()
            })?;

        if result.effect == Effect::Indeterminate {
            debug!(zone_id = %zone, "Not caching indeterminate decision");
            return Ok(result);
        }

        // Record translations first so a reset of the requested resource
        // already reaches the resolved ones once the decision is visible.
        let translated: BTreeSet<String> = result
            .resolved_resource_uris
            .iter()
            .filter(|uri| **uri != request.resource_identifier)
            .cloned()
            .collect();
        if !translated.is_empty() {
            if let Err(e) = self
                .cache
                .set_resource_translations(zone, &request.resource_identifier, &translated)
                .await
            {
                warn!(error = %e, "Recording resource translations failed");
            }
        }
        if let Err(e) = self.cache.set(&key, result.clone()).await {
            warn!(error = %e, "Decision cache write failed");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acs_core::types::{Attribute, AttributeEntity, ZoneId};
    use attributes::ResolverSettings;
    use decision_cache::{DefaultDecisionCache, StaticConnectorService};
    use errors::AttributeStoreError;
    use storage::{InMemoryAttributeStore, InMemoryKeyValueStore};
    use testing::ScriptedEvaluator;

    fn zone() -> ZoneId {
        ZoneId::new("zone1".to_string()).unwrap()
    }

    fn request(resource: &str) -> EvaluationRequest {
        EvaluationRequest {
            zone_id: zone(),
            subject_identifier: "mulder".to_string(),
            resource_identifier: resource.to_string(),
            action: "GET".to_string(),
            subject_attributes: BTreeSet::new(),
            policy_set_ids: vec!["p1".to_string()]
        }
    }

    fn point(evaluator: Arc<ScriptedEvaluator>) -> (CachedDecisionPoint, Arc<HierarchicalAttributeResolver>) {
        let (point, resolver, _) = point_with_cache(evaluator);
        (point, resolver)
    }

    fn point_with_cache(
        evaluator: Arc<ScriptedEvaluator>
    ) -> (CachedDecisionPoint, Arc<HierarchicalAttributeResolver>, Arc<DefaultDecisionCache>) {
        let resolver = Arc::new(HierarchicalAttributeResolver::new(
            Arc::new(InMemoryAttributeStore::new()),
            ResolverSettings::default()
        ));
        let cache = Arc::new(DefaultDecisionCache::new(
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(InMemoryKeyValueStore::new()),
            Arc::new(StaticConnectorService::none())
        ));
        (
            CachedDecisionPoint::new(cache.clone(), resolver.clone(), evaluator),
            resolver,
            cache
        )
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let evaluator = Arc::new(
            ScriptedEvaluator::new(PolicyEvaluationResult::new(Effect::NotApplicable))
                .answer("mulder", "/x-files", PolicyEvaluationResult::new(Effect::Permit))
        );
        let (point, _) = point(evaluator.clone());

        let first = point.evaluate(&request("/x-files")).await.unwrap();
        let second = point.evaluate(&request("/x-files")).await.unwrap();
        assert_eq!(first.effect, Effect::Permit);
        assert_eq!(second.effect, Effect::Permit);
        assert_eq!(evaluator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_resolved_uris_are_recorded_as_translations() {
        let evaluator = Arc::new(
            ScriptedEvaluator::new(PolicyEvaluationResult::new(Effect::NotApplicable)).answer(
                "mulder",
                "/x-files",
                PolicyEvaluationResult::new(Effect::Permit).with_resolved_resource_uri("/v1/x-files")
            )
        );
        let (point, _, cache) = point_with_cache(evaluator.clone());

        point.evaluate(&request("/x-files")).await.unwrap();
        point.evaluate(&request("/x-files")).await.unwrap();
        assert_eq!(evaluator.call_count(), 1);

        // The decision is guarded by the resolved URI only; the translation
        // makes a reset of the requested resource reach it.
        cache.reset_for_resource(&zone(), "/x-files").await.unwrap();
        point.evaluate(&request("/x-files")).await.unwrap();
        assert_eq!(evaluator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_indeterminate_is_not_cached() {
        let evaluator = Arc::new(ScriptedEvaluator::new(PolicyEvaluationResult::new(
            Effect::Indeterminate
        )));
        let (point, _) = point(evaluator.clone());

        point.evaluate(&request("/x-files")).await.unwrap();
        point.evaluate(&request("/x-files")).await.unwrap();
        assert_eq!(evaluator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_evaluator_sees_inherited_attributes() {
        let evaluator = Arc::new(ScriptedEvaluator::new(PolicyEvaluationResult::new(Effect::Deny)));
        let (point, resolver) = point(evaluator.clone());
        resolver
            .upsert(
                &AttributeEntity::subject(zone(), "fbi")
                    .with_attribute(Attribute::new("acs", "agency", "fbi"))
            )
            .await
            .unwrap();
        resolver
            .upsert(&AttributeEntity::subject(zone(), "mulder").with_parent("fbi"))
            .await
            .unwrap();

        point.evaluate(&request("/x-files")).await.unwrap();

        let calls = evaluator.calls();
        let subject = calls[0].subject.as_ref().unwrap();
        assert!(subject.attributes.contains(&Attribute::new("acs", "agency", "fbi")));
        assert!(calls[0].resource.is_none());
    }

    #[tokio::test]
    async fn test_traversal_limit_surfaces_as_attribute_error() {
        let evaluator = Arc::new(ScriptedEvaluator::new(PolicyEvaluationResult::new(Effect::Permit)));
        let (point, resolver) = point(evaluator);
        resolver.upsert(&AttributeEntity::subject(zone(), "fbi")).await.unwrap();
        resolver
            .upsert(&AttributeEntity::subject(zone(), "mulder").with_parent("fbi"))
            .await
            .unwrap();
        resolver.set_traversal_limit(1);

        let err = point.evaluate(&request("/x-files")).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Attributes(AttributeStoreError::AttributeLimitExceeded { .. })
        ));
    }
}
