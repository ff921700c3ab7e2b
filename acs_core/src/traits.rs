//! Collaborator contracts for the access control core

use std::collections::BTreeSet;

use async_trait::async_trait;
use errors::StorageError;

use crate::types::{
    AttributeConnector, AttributeEntity, EntityKind, EvaluationRequest, PolicyEvaluationResult,
    UpsertOutcome, ZoneId
};

/// Backing key/value store for the decision cache.
///
/// Holds plain string keys and values. Implementations carry no business
/// logic; staleness rules live in the cache engine.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Reads every key in one round trip. The result has one slot per input
    /// key, in input order.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn multi_set(&self, entries: &[(String, String)]) -> Result<(), StorageError>;

    /// Returns `true` when the value was written, `false` when the key
    /// already held a value (which is left untouched).
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError>;

    async fn flush_all(&self) -> Result<(), StorageError>;

    /// Keys matching a glob pattern (`*` any run, `?` any single character).
    async fn keys(&self, pattern: &str) -> Result<BTreeSet<String>, StorageError>;

    /// Adds members to the set stored at `key`.
    async fn add_to_set(&self, key: &str, members: &[String]) -> Result<(), StorageError>;

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, StorageError>;
}

/// Persistence for resources and subjects and their parent edges.
///
/// Structural validation (cycles, cross-zone and dangling parents) belongs to
/// the resolver; stores only enforce uniqueness of `(zone, kind, identifier)`
/// and report races on it as `StorageError::LockContention`.
#[async_trait]
pub trait AttributeEntityStore: Send + Sync {
    async fn get(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Option<AttributeEntity>, StorageError>;

    /// Writes the entity row and replaces its parent edges atomically.
    async fn upsert(&self, entity: &AttributeEntity) -> Result<UpsertOutcome, StorageError>;

    /// Removes the entity and every edge that references it. Returns whether
    /// anything was deleted.
    async fn delete(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<bool, StorageError>;

    async fn list(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind
    ) -> Result<Vec<AttributeEntity>, StorageError>;

    /// Identifiers of the direct children of an entity.
    async fn children(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<BTreeSet<String>, StorageError>;

    /// Zones in which an entity with this identifier exists.
    async fn zones_containing(
        &self,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Vec<ZoneId>, StorageError>;
}

/// External time-based attribute sources.
pub trait AttributeConnectorService: Send + Sync {
    fn resource_attribute_connector(&self) -> Option<AttributeConnector>;

    fn subject_attribute_connector(&self) -> Option<AttributeConnector>;

    fn is_resource_attribute_connector_configured(&self) -> bool {
        self.resource_attribute_connector().is_some()
    }

    fn is_subject_attribute_connector_configured(&self) -> bool {
        self.subject_attribute_connector().is_some()
    }
}

/// The policy matching engine. Receives the request together with the
/// effective (inherited) subject and resource entities, when they exist.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        subject: Option<&AttributeEntity>,
        resource: Option<&AttributeEntity>
    ) -> anyhow::Result<PolicyEvaluationResult>;
}
