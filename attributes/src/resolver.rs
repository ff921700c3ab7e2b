use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use acs_core::traits::AttributeEntityStore;
use acs_core::types::{AttributeEntity, EntityKind, UpsertOutcome, ZoneId};
use errors::{AttributeStoreError, StorageError};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};
use validator::Validate;

pub const DEFAULT_TRAVERSAL_LIMIT: usize = 256;

/// Tuning for the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    pub traversal_limit: usize,
    pub contention_retry_attempts: usize,
    pub contention_retry_delay: Duration
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            traversal_limit: DEFAULT_TRAVERSAL_LIMIT,
            contention_retry_attempts: 3,
            contention_retry_delay: Duration::from_millis(20)
        }
    }
}

impl From<&config::AttributesConfig> for ResolverSettings {
    fn from(config: &config::AttributesConfig) -> Self {
        Self {
            traversal_limit: config.traversal_limit,
            contention_retry_attempts: config.contention_retry_attempts,
            contention_retry_delay: Duration::from_millis(config.contention_retry_delay_ms)
        }
    }
}

/// Traversal and integrity rules over an [`AttributeEntityStore`].
///
/// Parent edges point upward. Inherited attributes are gathered by walking
/// parents breadth-first; descendants by walking the child index downward.
/// Every write is checked so that the parent graph stays acyclic and
/// zone-local. Writes within a zone are serialized so two concurrent edges
/// cannot each pass the cycle check against a graph missing the other.
pub struct HierarchicalAttributeResolver {
    store: Arc<dyn AttributeEntityStore>,
    zone_writes: Mutex<HashMap<ZoneId, Arc<tokio::sync::Mutex<()>>>>,
    traversal_limit: AtomicUsize,
    contention_retry_attempts: usize,
    contention_retry_delay: Duration
}

impl HierarchicalAttributeResolver {
    pub fn new(store: Arc<dyn AttributeEntityStore>, settings: ResolverSettings) -> Self {
        Self {
            store,
            zone_writes: Mutex::new(HashMap::new()),
            traversal_limit: AtomicUsize::new(settings.traversal_limit.max(1)),
            contention_retry_attempts: settings.contention_retry_attempts,
            contention_retry_delay: settings.contention_retry_delay
        }
    }

    pub fn store(&self) -> &Arc<dyn AttributeEntityStore> {
        &self.store
    }

    pub fn traversal_limit(&self) -> usize {
        self.traversal_limit.load(Ordering::Acquire)
    }

    /// Replaces the traversal limit for subsequent reads and returns the
    /// previous value. Values below 1 are raised to 1.
    pub fn set_traversal_limit(&self, limit: usize) -> usize {
        let previous = self.traversal_limit.swap(limit.max(1), Ordering::AcqRel);
        if previous != limit {
            info!(previous, limit, "Attribute traversal limit changed");
        }
        previous
    }

    pub async fn get_direct(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Option<AttributeEntity>, AttributeStoreError> {
        Ok(self.store.get(zone_id, kind, identifier).await?)
    }

    /// [`Self::get_with_limit`] using the configured traversal limit.
    pub async fn get_with_inherited_attributes(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Option<AttributeEntity>, AttributeStoreError> {
        self.get_with_limit(zone_id, kind, identifier, self.traversal_limit())
            .await
    }

    /// Returns the entity with its own attributes unioned with those of every
    /// reachable ancestor. `parents` keeps the entity's direct parents.
    ///
    /// The entity itself counts as the first visited node; visiting more than
    /// `traversal_limit` nodes fails with `AttributeLimitExceeded`.
    pub async fn get_with_limit(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str,
        traversal_limit: usize
    ) -> Result<Option<AttributeEntity>, AttributeStoreError> {
        let Some(entity) = self.store.get(zone_id, kind, identifier).await? else {
            return Ok(None);
        };

        let mut effective = entity.clone();
        let mut visited: HashSet<String> = HashSet::from([entity.identifier.clone()]);
        let mut queue: VecDeque<String> = entity.parents.iter().cloned().collect();
        let mut visited_nodes = 1_usize;

        while let Some(ancestor_id) = queue.pop_front() {
            if !visited.insert(ancestor_id.clone()) {
                continue;
            }
            let Some(ancestor) = self.store.get(zone_id, kind, &ancestor_id).await? else {
                warn!(
                    zone_id = %zone_id,
                    identifier,
                    ancestor = %ancestor_id,
                    "Skipping missing ancestor during attribute traversal"
                );
                continue;
            };

            visited_nodes += 1;
            if visited_nodes > traversal_limit {
                warn!(
                    zone_id = %zone_id,
                    identifier,
                    limit = traversal_limit,
                    "Attribute traversal limit exceeded"
                );
                return Err(AttributeStoreError::AttributeLimitExceeded {
                    zone_id: zone_id.to_string(),
                    identifier: identifier.to_string(),
                    limit: traversal_limit
                });
            }

            effective.attributes.extend(ancestor.attributes);
            queue.extend(
                ancestor
                    .parents
                    .into_iter()
                    .filter(|parent| !visited.contains(parent))
            );
        }

        histogram!("acs_attribute_traversal_nodes", "kind" => kind.to_string())
            .record(visited_nodes as f64);
        debug!(
            zone_id = %zone_id,
            identifier,
            visited_nodes,
            attributes = effective.attributes.len(),
            "Resolved inherited attributes"
        );
        Ok(Some(effective))
    }

    /// The entity plus every transitive child. An unknown identifier yields a
    /// set containing only itself.
    ///
    /// Bounded by the same traversal limit as ancestor resolution, counting
    /// the entity itself.
    pub async fn get_descendant_ids(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<BTreeSet<String>, AttributeStoreError> {
        let limit = self.traversal_limit();
        let mut descendants = BTreeSet::from([identifier.to_string()]);
        let mut queue = VecDeque::from([identifier.to_string()]);

        while let Some(current) = queue.pop_front() {
            for child in self.store.children(zone_id, kind, &current).await? {
                if !descendants.insert(child.clone()) {
                    continue;
                }
                if descendants.len() > limit {
                    warn!(
                        zone_id = %zone_id,
                        identifier,
                        limit,
                        "Descendant traversal limit exceeded"
                    );
                    return Err(AttributeStoreError::AttributeLimitExceeded {
                        zone_id: zone_id.to_string(),
                        identifier: identifier.to_string(),
                        limit
                    });
                }
                queue.push_back(child);
            }
        }
        Ok(descendants)
    }

    /// Validates the entity's parent edges and persists it.
    ///
    /// Rejections leave the store untouched. Validation and write run under
    /// the zone's write lock. Lock contention from the store is retried with
    /// a short jittered backoff before being surfaced.
    pub async fn upsert(
        &self,
        entity: &AttributeEntity
    ) -> Result<UpsertOutcome, AttributeStoreError> {
        entity
            .validate()
            .map_err(|e| AttributeStoreError::InvalidEntity {
                zone_id: entity.zone_id.to_string(),
                identifier: entity.identifier.clone(),
                reason: e.to_string()
            })?;
        let zone_lock = self.zone_write_lock(&entity.zone_id);
        let _guard = zone_lock.lock().await;
        self.check_parents(entity).await?;

        let outcome = self.write_with_retry(entity).await?;
        debug!(
            zone_id = %entity.zone_id,
            kind = %entity.kind,
            identifier = %entity.identifier,
            outcome = ?outcome,
            "Stored attribute entity"
        );
        Ok(outcome)
    }

    pub async fn delete(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<bool, AttributeStoreError> {
        let zone_lock = self.zone_write_lock(zone_id);
        let _guard = zone_lock.lock().await;
        Ok(self.store.delete(zone_id, kind, identifier).await?)
    }

    fn zone_write_lock(&self, zone_id: &ZoneId) -> Arc<tokio::sync::Mutex<()>> {
        self.zone_writes
            .lock()
            .entry(zone_id.clone())
            .or_default()
            .clone()
    }

    async fn check_parents(&self, entity: &AttributeEntity) -> Result<(), AttributeStoreError> {
        let zone = &entity.zone_id;
        for parent in &entity.parents {
            if parent == &entity.identifier {
                return Err(AttributeStoreError::CyclicReference {
                    zone_id: zone.to_string(),
                    identifier: entity.identifier.clone(),
                    parent: parent.clone()
                });
            }

            if self.store.get(zone, entity.kind, parent).await?.is_none() {
                let elsewhere = self
                    .store
                    .zones_containing(entity.kind, parent)
                    .await?
                    .into_iter()
                    .find(|z| z != zone);
                return Err(match elsewhere {
                    Some(parent_zone) => AttributeStoreError::CrossZoneReference {
                        zone_id: zone.to_string(),
                        identifier: entity.identifier.clone(),
                        parent: parent.clone(),
                        parent_zone_id: parent_zone.to_string()
                    },
                    None => AttributeStoreError::DanglingParent {
                        zone_id: zone.to_string(),
                        identifier: entity.identifier.clone(),
                        parent: parent.clone()
                    }
                });
            }
        }

        for parent in &entity.parents {
            if self.reaches(entity, parent).await? {
                warn!(
                    zone_id = %zone,
                    identifier = %entity.identifier,
                    parent = %parent,
                    "Rejected parent edge that would create a cycle"
                );
                return Err(AttributeStoreError::CyclicReference {
                    zone_id: zone.to_string(),
                    identifier: entity.identifier.clone(),
                    parent: parent.clone()
                });
            }
        }
        Ok(())
    }

    /// Walks upward from `start` and reports whether `entity` is reachable.
    async fn reaches(
        &self,
        entity: &AttributeEntity,
        start: &str
    ) -> Result<bool, AttributeStoreError> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start.to_string()]);

        while let Some(current) = queue.pop_front() {
            if current == entity.identifier {
                return Ok(true);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.store.get(&entity.zone_id, entity.kind, &current).await? {
                queue.extend(node.parents.into_iter().filter(|p| !visited.contains(p)));
            }
        }
        Ok(false)
    }

    async fn write_with_retry(
        &self,
        entity: &AttributeEntity
    ) -> Result<UpsertOutcome, StorageError> {
        let factor = (self.contention_retry_delay.as_millis() as u64 / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .map(jitter)
            .take(self.contention_retry_attempts);
        let attempts = AtomicUsize::new(0);

        let result = RetryIf::spawn(
            strategy,
            || {
                if attempts.fetch_add(1, Ordering::Relaxed) > 0 {
                    counter!("acs_attribute_write_retries_total").increment(1);
                }
                self.store.upsert(entity)
            },
            |e: &StorageError| e.is_contention()
        )
        .await;

        if let Err(e) = &result {
            if e.is_contention() {
                warn!(
                    zone_id = %entity.zone_id,
                    identifier = %entity.identifier,
                    attempts = attempts.load(Ordering::Relaxed),
                    "Giving up on contended attribute write"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acs_core::types::Attribute;
    use storage::InMemoryAttributeStore;

    fn zone(name: &str) -> ZoneId {
        ZoneId::new(name.to_string()).unwrap()
    }

    fn resolver() -> HierarchicalAttributeResolver {
        HierarchicalAttributeResolver::new(
            Arc::new(InMemoryAttributeStore::new()),
            ResolverSettings::default()
        )
    }

    async fn chain(resolver: &HierarchicalAttributeResolver, zone: &ZoneId, length: usize) {
        for i in 0..length {
            let mut entity = AttributeEntity::subject(zone.clone(), format!("n{i}"))
                .with_attribute(Attribute::new("acs", "level", i.to_string()));
            if i > 0 {
                entity = entity.with_parent(format!("n{}", i - 1));
            }
            resolver.upsert(&entity).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_inherited_attributes_union_ancestors() {
        let resolver = resolver();
        let z = zone("z1");
        resolver
            .upsert(
                &AttributeEntity::resource(z.clone(), "/site")
                    .with_attribute(Attribute::new("acs", "site", "basement"))
            )
            .await
            .unwrap();
        resolver
            .upsert(
                &AttributeEntity::resource(z.clone(), "/site/x-files")
                    .with_attribute(Attribute::new("acs", "classification", "secret"))
                    .with_parent("/site")
            )
            .await
            .unwrap();

        let direct = resolver
            .get_direct(&z, EntityKind::Resource, "/site/x-files")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(direct.attributes.len(), 1);

        let effective = resolver
            .get_with_inherited_attributes(&z, EntityKind::Resource, "/site/x-files")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(effective.attributes.len(), 2);
        assert_eq!(effective.parents, direct.parents);
    }

    #[tokio::test]
    async fn test_missing_entity_resolves_to_none() {
        let resolver = resolver();
        let result = resolver
            .get_with_inherited_attributes(&zone("z1"), EntityKind::Subject, "nobody")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_traversal_limit_boundary() {
        let resolver = resolver();
        let z = zone("z1");
        chain(&resolver, &z, 5).await;

        // n4 plus four ancestors is exactly five nodes.
        let ok = resolver
            .get_with_limit(&z, EntityKind::Subject, "n4", 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ok.attributes.len(), 5);

        let err = resolver
            .get_with_limit(&z, EntityKind::Subject, "n4", 4)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AttributeStoreError::AttributeLimitExceeded { limit: 4, .. }
        ));
    }

    #[tokio::test]
    async fn test_runtime_limit_change_is_restorable() {
        let resolver = resolver();
        let z = zone("z1");
        chain(&resolver, &z, 3).await;

        let previous = resolver.set_traversal_limit(2);
        assert_eq!(previous, DEFAULT_TRAVERSAL_LIMIT);
        assert!(resolver
            .get_with_inherited_attributes(&z, EntityKind::Subject, "n2")
            .await
            .is_err());

        resolver.set_traversal_limit(previous);
        assert!(resolver
            .get_with_inherited_attributes(&z, EntityKind::Subject, "n2")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_diamond_counts_shared_ancestor_once() {
        let resolver = resolver();
        let z = zone("z1");
        resolver.upsert(&AttributeEntity::subject(z.clone(), "root")).await.unwrap();
        resolver
            .upsert(&AttributeEntity::subject(z.clone(), "left").with_parent("root"))
            .await
            .unwrap();
        resolver
            .upsert(&AttributeEntity::subject(z.clone(), "right").with_parent("root"))
            .await
            .unwrap();
        resolver
            .upsert(
                &AttributeEntity::subject(z.clone(), "leaf")
                    .with_parent("left")
                    .with_parent("right")
            )
            .await
            .unwrap();

        assert!(resolver
            .get_with_limit(&z, EntityKind::Subject, "leaf", 4)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_descendants_include_self_and_transitive_children() {
        let resolver = resolver();
        let z = zone("z1");
        chain(&resolver, &z, 3).await;

        let ids = resolver
            .get_descendant_ids(&z, EntityKind::Subject, "n0")
            .await
            .unwrap();
        assert_eq!(
            ids,
            BTreeSet::from(["n0".to_string(), "n1".to_string(), "n2".to_string()])
        );

        let unknown = resolver
            .get_descendant_ids(&z, EntityKind::Subject, "ghost")
            .await
            .unwrap();
        assert_eq!(unknown, BTreeSet::from(["ghost".to_string()]));
    }

    #[tokio::test]
    async fn test_descendant_traversal_respects_limit() {
        let resolver = resolver();
        let z = zone("z1");
        chain(&resolver, &z, 4).await;

        let previous = resolver.set_traversal_limit(4);
        assert_eq!(
            resolver
                .get_descendant_ids(&z, EntityKind::Subject, "n0")
                .await
                .unwrap()
                .len(),
            4
        );

        resolver.set_traversal_limit(3);
        let err = resolver
            .get_descendant_ids(&z, EntityKind::Subject, "n0")
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeStoreError::AttributeLimitExceeded { limit: 3, .. }));
        resolver.set_traversal_limit(previous);
    }

    #[tokio::test]
    async fn test_self_parent_is_rejected() {
        let resolver = resolver();
        let err = resolver
            .upsert(&AttributeEntity::subject(zone("z1"), "A").with_parent("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeStoreError::CyclicReference { ref parent, .. } if parent == "A"));
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_without_mutation() {
        let resolver = resolver();
        let z = zone("z1");
        resolver.upsert(&AttributeEntity::subject(z.clone(), "A")).await.unwrap();
        resolver
            .upsert(&AttributeEntity::subject(z.clone(), "B").with_parent("A"))
            .await
            .unwrap();
        resolver
            .upsert(&AttributeEntity::subject(z.clone(), "C").with_parent("B"))
            .await
            .unwrap();

        let err = resolver
            .upsert(&AttributeEntity::subject(z.clone(), "A").with_parent("C"))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeStoreError::CyclicReference { ref parent, .. } if parent == "C"));

        let a = resolver
            .get_direct(&z, EntityKind::Subject, "A")
            .await
            .unwrap()
            .unwrap();
        assert!(a.parents.is_empty());
    }

    #[tokio::test]
    async fn test_dangling_and_cross_zone_parents() {
        let resolver = resolver();
        resolver
            .upsert(&AttributeEntity::resource(zone("z2"), "/elsewhere"))
            .await
            .unwrap();

        let dangling = resolver
            .upsert(&AttributeEntity::resource(zone("z1"), "/x").with_parent("/nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(dangling, AttributeStoreError::DanglingParent { .. }));

        let cross = resolver
            .upsert(&AttributeEntity::resource(zone("z1"), "/x").with_parent("/elsewhere"))
            .await
            .unwrap_err();
        assert!(matches!(
            cross,
            AttributeStoreError::CrossZoneReference { ref parent_zone_id, .. } if parent_zone_id == "z2"
        ));

        assert!(resolver
            .get_direct(&zone("z1"), EntityKind::Resource, "/x")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_invalid_entity_is_rejected() {
        let resolver = resolver();
        let err = resolver
            .upsert(&AttributeEntity::resource(zone("z1"), ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AttributeStoreError::InvalidEntity { .. }));
    }
}
