use std::collections::BTreeSet;
use std::sync::Arc;

use acs_core::types::{AttributeEntity, EntityKind, UpsertOutcome, ZoneId};
use attributes::HierarchicalAttributeResolver;
use decision_cache::DecisionCache;
use errors::{AttributeStoreError, CacheError, ServiceError};
use tracing::{error, info, warn};

/// Writes to resources and subjects, each followed by invalidation of every
/// decision that could have used the changed attributes.
///
/// An attribute change on an entity reaches every descendant through
/// inheritance, so the invalidation covers the entity and all of its
/// transitive children. A failed invalidation is reported as
/// [`ServiceError::Invalidation`] even though the write itself succeeded.
pub struct PrivilegeManagementService {
    resolver: Arc<HierarchicalAttributeResolver>,
    cache: Arc<dyn DecisionCache>
}

impl PrivilegeManagementService {
    pub fn new(resolver: Arc<HierarchicalAttributeResolver>, cache: Arc<dyn DecisionCache>) -> Self {
        Self { resolver, cache }
    }

    pub async fn get_entity(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str,
        inherited: bool
    ) -> Result<Option<AttributeEntity>, ServiceError> {
        let entity = if inherited {
            self.resolver
                .get_with_inherited_attributes(zone_id, kind, identifier)
                .await?
        } else {
            self.resolver.get_direct(zone_id, kind, identifier).await?
        };
        Ok(entity)
    }

    pub async fn list_entities(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind
    ) -> Result<Vec<AttributeEntity>, ServiceError> {
        Ok(self
            .resolver
            .store()
            .list(zone_id, kind)
            .await
            .map_err(AttributeStoreError::from)?)
    }

    pub async fn descendants(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<BTreeSet<String>, ServiceError> {
        Ok(self
            .resolver
            .get_descendant_ids(zone_id, kind, identifier)
            .await?)
    }

    pub async fn upsert_resource(&self, entity: &AttributeEntity) -> Result<UpsertOutcome, ServiceError> {
        self.upsert_as(EntityKind::Resource, entity).await
    }

    pub async fn upsert_subject(&self, entity: &AttributeEntity) -> Result<UpsertOutcome, ServiceError> {
        self.upsert_as(EntityKind::Subject, entity).await
    }

    async fn upsert_as(&self, kind: EntityKind, entity: &AttributeEntity) -> Result<UpsertOutcome, ServiceError> {
        ensure_kind(kind, entity)?;
        let outcome = self.resolver.upsert(entity).await?;
        let affected = self
            .affected(&entity.zone_id, kind, std::slice::from_ref(&entity.identifier))
            .await?;
        self.invalidate(&entity.zone_id, kind, affected).await?;
        Ok(outcome)
    }

    /// Writes entities in the given order, so parents must precede children,
    /// then invalidates everything they reach in one batch. Stops at the first
    /// rejected entity; entities written before it stay written and are
    /// still invalidated.
    pub async fn upsert_resources(&self, zone_id: &ZoneId, entities: &[AttributeEntity]) -> Result<usize, ServiceError> {
        self.bulk_upsert(zone_id, EntityKind::Resource, entities).await
    }

    pub async fn upsert_subjects(&self, zone_id: &ZoneId, entities: &[AttributeEntity]) -> Result<usize, ServiceError> {
        self.bulk_upsert(zone_id, EntityKind::Subject, entities).await
    }

    async fn bulk_upsert(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        entities: &[AttributeEntity]
    ) -> Result<usize, ServiceError> {
        let mut written = Vec::with_capacity(entities.len());
        let mut failure = None;
        for entity in entities {
            if entity.zone_id != *zone_id {
                failure = Some(ServiceError::Attributes(AttributeStoreError::InvalidEntity {
                    zone_id: zone_id.to_string(),
                    identifier: entity.identifier.clone(),
                    reason: format!("entity belongs to zone {}", entity.zone_id)
                }));
                break;
            }
            if let Err(e) = ensure_kind(kind, entity) {
                failure = Some(e);
                break;
            }
            match self.resolver.upsert(entity).await {
                Ok(_) => written.push(entity.identifier.clone()),
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            }
        }

        let affected = self.affected(zone_id, kind, &written).await?;
        self.invalidate(zone_id, kind, affected).await?;

        match failure {
            Some(e) => Err(e),
            None => {
                info!(zone_id = %zone_id, kind = %kind, count = written.len(), "Bulk upsert complete");
                Ok(written.len())
            }
        }
    }

    /// Deletes the entity. Descendants are collected first because deleting
    /// drops the edges that lead to them.
    pub async fn delete_entity(&self, zone_id: &ZoneId, kind: EntityKind, identifier: &str) -> Result<bool, ServiceError> {
        let affected = self
            .affected(zone_id, kind, &[identifier.to_string()])
            .await?;
        let deleted = self.resolver.delete(zone_id, kind, identifier).await?;
        if deleted {
            self.invalidate(zone_id, kind, affected).await?;
        }
        Ok(deleted)
    }

    /// Invalidates decisions made under a policy set after it changed.
    pub async fn policy_set_changed(&self, zone_id: &ZoneId, policy_set_id: &str) -> Result<(), ServiceError> {
        self.cache
            .reset_for_policy_set(zone_id, policy_set_id)
            .await
            .map_err(|source| invalidation_error("policy_set", zone_id, source))
    }

    /// Invalidates an entity and its descendants without writing anything.
    /// Fails with `AttributeLimitExceeded` when the subtree is wider than the
    /// traversal limit; a full flush is then the operator's call.
    pub async fn invalidate_entity(&self, zone_id: &ZoneId, kind: EntityKind, identifier: &str) -> Result<usize, ServiceError> {
        let affected = self
            .resolver
            .get_descendant_ids(zone_id, kind, identifier)
            .await?;
        let count = affected.len();
        self.invalidate(zone_id, kind, Affected::Ids(affected)).await?;
        Ok(count)
    }

    /// Everything below `identifiers`. A subtree wider than the traversal
    /// limit cannot be enumerated, so the whole cache is invalidated instead.
    async fn affected(&self, zone_id: &ZoneId, kind: EntityKind, identifiers: &[String]) -> Result<Affected, ServiceError> {
        let mut all = BTreeSet::new();
        for identifier in identifiers {
            match self.resolver.get_descendant_ids(zone_id, kind, identifier).await {
                Ok(descendants) => all.extend(descendants),
                Err(AttributeStoreError::AttributeLimitExceeded { limit, .. }) => {
                    warn!(
                        zone_id = %zone_id,
                        kind = %kind,
                        identifier = %identifier,
                        limit,
                        "Too many descendants to invalidate individually, flushing all decisions"
                    );
                    return Ok(Affected::Everything);
                }
                Err(e) => return Err(e.into())
            }
        }
        Ok(Affected::Ids(all))
    }

    async fn invalidate(&self, zone_id: &ZoneId, kind: EntityKind, affected: Affected) -> Result<(), ServiceError> {
        let result = match affected {
            Affected::Ids(identifiers) if identifiers.is_empty() => return Ok(()),
            Affected::Ids(identifiers) => {
                let ids: Vec<String> = identifiers.into_iter().collect();
                match kind {
                    EntityKind::Resource => self.cache.reset_for_resources_by_ids(zone_id, &ids).await,
                    EntityKind::Subject => self.cache.reset_for_subjects_by_ids(zone_id, &ids).await
                }
            }
            Affected::Everything => self.cache.reset_all().await
        };
        result.map_err(|source| invalidation_error(&kind.to_string(), zone_id, source))
    }
}

enum Affected {
    Ids(BTreeSet<String>),
    Everything
}

fn ensure_kind(kind: EntityKind, entity: &AttributeEntity) -> Result<(), ServiceError> {
    if entity.kind == kind {
        return Ok(());
    }
    Err(ServiceError::Attributes(AttributeStoreError::InvalidEntity {
        zone_id: entity.zone_id.to_string(),
        identifier: entity.identifier.clone(),
        reason: format!("expected a {kind}, got a {}", entity.kind)
    }))
}

fn invalidation_error(kind: &str, zone_id: &ZoneId, source: CacheError) -> ServiceError {
    error!(zone_id = %zone_id, kind, error = %source, "Invalidation did not reach the cache");
    ServiceError::Invalidation {
        kind: kind.to_string(),
        zone_id: zone_id.to_string(),
        source
    }
}
