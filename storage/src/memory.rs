//! In-process backends.
//!
//! Each store owns its state behind an `Arc<Mutex<_>>`; clones share the same
//! state, separate instances never do.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use acs_core::traits::{AttributeEntityStore, KeyValueStore};
use acs_core::types::{AttributeEntity, EntityKind, UpsertOutcome, ZoneId};
use async_trait::async_trait;
use errors::StorageError;
use parking_lot::Mutex;

const BACKEND: &str = "Memory";

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Members(BTreeSet<String>)
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::QueryError {
        backend: BACKEND.to_string(),
        reason: format!("WRONGTYPE operation against key {key} holding the wrong kind of value")
    }
}

/// Mutex-guarded map implementing the cache backing-store contract with the
/// same string/set semantics as the Redis store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    state: Arc<Mutex<HashMap<String, StoredValue>>>
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.state.lock().get(key) {
            None => Ok(None),
            Some(StoredValue::Text(value)) => Ok(Some(value.clone())),
            Some(StoredValue::Members(_)) => Err(wrong_type(key))
        }
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        let state = self.state.lock();
        // Non-string values read as absent, like MGET.
        Ok(keys
            .iter()
            .map(|key| match state.get(key) {
                Some(StoredValue::Text(value)) => Some(value.clone()),
                _ => None
            })
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.state
            .lock()
            .insert(key.to_string(), StoredValue::Text(value.to_string()));
        Ok(())
    }

    async fn multi_set(&self, entries: &[(String, String)]) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        for (key, value) in entries {
            state.insert(key.clone(), StoredValue::Text(value.clone()));
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let mut state = self.state.lock();
        if state.contains_key(key) {
            return Ok(false);
        }
        state.insert(key.to_string(), StoredValue::Text(value.to_string()));
        Ok(true)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        for key in keys {
            state.remove(key);
        }
        Ok(())
    }

    async fn flush_all(&self) -> Result<(), StorageError> {
        self.state.lock().clear();
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<BTreeSet<String>, StorageError> {
        let matcher = utils::glob_to_regex(pattern).map_err(|e| StorageError::QueryError {
            backend: BACKEND.to_string(),
            reason: e.to_string()
        })?;
        Ok(self
            .state
            .lock()
            .keys()
            .filter(|key| matcher.is_match(key))
            .cloned()
            .collect())
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let entry = state
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::Members(BTreeSet::new()));
        match entry {
            StoredValue::Members(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            StoredValue::Text(_) => Err(wrong_type(key))
        }
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, StorageError> {
        match self.state.lock().get(key) {
            None => Ok(BTreeSet::new()),
            Some(StoredValue::Members(set)) => Ok(set.clone()),
            Some(StoredValue::Text(_)) => Err(wrong_type(key))
        }
    }
}

type EntityKey = (ZoneId, EntityKind, String);

#[derive(Debug, Default)]
struct EntityState {
    entities: HashMap<EntityKey, AttributeEntity>,
    /// parent key -> identifiers of direct children
    children: HashMap<EntityKey, BTreeSet<String>>
}

impl EntityState {
    fn unlink_parents(&mut self, entity: &AttributeEntity) {
        for parent in &entity.parents {
            let parent_key = (entity.zone_id.clone(), entity.kind, parent.clone());
            if let Some(children) = self.children.get_mut(&parent_key) {
                children.remove(&entity.identifier);
                if children.is_empty() {
                    self.children.remove(&parent_key);
                }
            }
        }
    }

    fn link_parents(&mut self, entity: &AttributeEntity) {
        for parent in &entity.parents {
            self.children
                .entry((entity.zone_id.clone(), entity.kind, parent.clone()))
                .or_default()
                .insert(entity.identifier.clone());
        }
    }
}

/// Attribute-entity store keeping a child index alongside the entities so
/// descendant queries never scan the whole zone.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAttributeStore {
    state: Arc<Mutex<EntityState>>
}

impl InMemoryAttributeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttributeEntityStore for InMemoryAttributeStore {
    async fn get(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Option<AttributeEntity>, StorageError> {
        let key = (zone_id.clone(), kind, identifier.to_string());
        Ok(self.state.lock().entities.get(&key).cloned())
    }

    async fn upsert(&self, entity: &AttributeEntity) -> Result<UpsertOutcome, StorageError> {
        let key = (entity.zone_id.clone(), entity.kind, entity.identifier.clone());
        let mut state = self.state.lock();
        let previous = state.entities.insert(key, entity.clone());
        if let Some(previous) = &previous {
            state.unlink_parents(previous);
        }
        state.link_parents(entity);
        Ok(if previous.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        })
    }

    async fn delete(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<bool, StorageError> {
        let key = (zone_id.clone(), kind, identifier.to_string());
        let mut state = self.state.lock();
        let Some(removed) = state.entities.remove(&key) else {
            return Ok(false);
        };
        state.unlink_parents(&removed);

        // Children lose the edge to the removed entity.
        if let Some(orphans) = state.children.remove(&key) {
            for child in orphans {
                let child_key = (zone_id.clone(), kind, child);
                if let Some(child_entity) = state.entities.get_mut(&child_key) {
                    child_entity.parents.remove(identifier);
                }
            }
        }
        Ok(true)
    }

    async fn list(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind
    ) -> Result<Vec<AttributeEntity>, StorageError> {
        let state = self.state.lock();
        let mut entities: Vec<AttributeEntity> = state
            .entities
            .values()
            .filter(|e| &e.zone_id == zone_id && e.kind == kind)
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(entities)
    }

    async fn children(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<BTreeSet<String>, StorageError> {
        let key = (zone_id.clone(), kind, identifier.to_string());
        Ok(self
            .state
            .lock()
            .children
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn zones_containing(
        &self,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Vec<ZoneId>, StorageError> {
        let state = self.state.lock();
        let mut zones: Vec<ZoneId> = state
            .entities
            .keys()
            .filter(|(_, k, id)| *k == kind && id == identifier)
            .map(|(zone, _, _)| zone.clone())
            .collect();
        zones.sort();
        Ok(zones)
    }
}
