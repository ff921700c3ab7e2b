//! Test doubles for the collaborator traits.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use acs_core::traits::{AttributeEntityStore, KeyValueStore, PolicyEvaluator};
use acs_core::types::{
    AttributeEntity, EntityKind, EvaluationRequest, PolicyEvaluationResult, UpsertOutcome, ZoneId
};
use async_trait::async_trait;
use decision_cache::Clock;
use errors::StorageError;
use parking_lot::Mutex;

fn unavailable(operation: &str) -> StorageError {
    StorageError::ConnectionError {
        backend: "Failing".to_string(),
        reason: format!("{operation}: backing store unavailable")
    }
}

/// Key/value store whose every call fails, as during a backing-store outage.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingKeyValueStore;

#[async_trait]
impl KeyValueStore for FailingKeyValueStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(unavailable("get"))
    }

    async fn multi_get(&self, _keys: &[String]) -> Result<Vec<Option<String>>, StorageError> {
        Err(unavailable("multi_get"))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(unavailable("set"))
    }

    async fn multi_set(&self, _entries: &[(String, String)]) -> Result<(), StorageError> {
        Err(unavailable("multi_set"))
    }

    async fn set_if_absent(&self, _key: &str, _value: &str) -> Result<bool, StorageError> {
        Err(unavailable("set_if_absent"))
    }

    async fn delete(&self, _keys: &[String]) -> Result<(), StorageError> {
        Err(unavailable("delete"))
    }

    async fn flush_all(&self) -> Result<(), StorageError> {
        Err(unavailable("flush_all"))
    }

    async fn keys(&self, _pattern: &str) -> Result<BTreeSet<String>, StorageError> {
        Err(unavailable("keys"))
    }

    async fn add_to_set(&self, _key: &str, _members: &[String]) -> Result<(), StorageError> {
        Err(unavailable("add_to_set"))
    }

    async fn set_members(&self, _key: &str) -> Result<BTreeSet<String>, StorageError> {
        Err(unavailable("set_members"))
    }
}

/// Entity store that reports lock contention on the first `failures`
/// upserts and delegates everything else.
pub struct ContendedAttributeStore {
    inner: Arc<dyn AttributeEntityStore>,
    remaining_failures: AtomicUsize,
    upsert_attempts: AtomicUsize
}

impl ContendedAttributeStore {
    pub fn new(inner: Arc<dyn AttributeEntityStore>, failures: usize) -> Self {
        Self {
            inner,
            remaining_failures: AtomicUsize::new(failures),
            upsert_attempts: AtomicUsize::new(0)
        }
    }

    pub fn upsert_attempts(&self) -> usize {
        self.upsert_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttributeEntityStore for ContendedAttributeStore {
    async fn get(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Option<AttributeEntity>, StorageError> {
        self.inner.get(zone_id, kind, identifier).await
    }

    async fn upsert(&self, entity: &AttributeEntity) -> Result<UpsertOutcome, StorageError> {
        self.upsert_attempts.fetch_add(1, Ordering::SeqCst);
        let contended = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if contended {
            return Err(StorageError::LockContention {
                backend: "Contended".to_string(),
                key: format!("{}/{}/{}", entity.zone_id, entity.kind, entity.identifier)
            });
        }
        self.inner.upsert(entity).await
    }

    async fn delete(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<bool, StorageError> {
        self.inner.delete(zone_id, kind, identifier).await
    }

    async fn list(&self, zone_id: &ZoneId, kind: EntityKind) -> Result<Vec<AttributeEntity>, StorageError> {
        self.inner.list(zone_id, kind).await
    }

    async fn children(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<BTreeSet<String>, StorageError> {
        self.inner.children(zone_id, kind, identifier).await
    }

    async fn zones_containing(&self, kind: EntityKind, identifier: &str) -> Result<Vec<ZoneId>, StorageError> {
        self.inner.zones_containing(kind, identifier).await
    }
}

/// Entity store that yields to the scheduler before every call, so
/// concurrent resolver writes interleave at each store round trip.
pub struct YieldingAttributeStore {
    inner: Arc<dyn AttributeEntityStore>
}

impl YieldingAttributeStore {
    pub fn new(inner: Arc<dyn AttributeEntityStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl AttributeEntityStore for YieldingAttributeStore {
    async fn get(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<Option<AttributeEntity>, StorageError> {
        tokio::task::yield_now().await;
        self.inner.get(zone_id, kind, identifier).await
    }

    async fn upsert(&self, entity: &AttributeEntity) -> Result<UpsertOutcome, StorageError> {
        tokio::task::yield_now().await;
        self.inner.upsert(entity).await
    }

    async fn delete(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<bool, StorageError> {
        tokio::task::yield_now().await;
        self.inner.delete(zone_id, kind, identifier).await
    }

    async fn list(&self, zone_id: &ZoneId, kind: EntityKind) -> Result<Vec<AttributeEntity>, StorageError> {
        tokio::task::yield_now().await;
        self.inner.list(zone_id, kind).await
    }

    async fn children(
        &self,
        zone_id: &ZoneId,
        kind: EntityKind,
        identifier: &str
    ) -> Result<BTreeSet<String>, StorageError> {
        tokio::task::yield_now().await;
        self.inner.children(zone_id, kind, identifier).await
    }

    async fn zones_containing(&self, kind: EntityKind, identifier: &str) -> Result<Vec<ZoneId>, StorageError> {
        tokio::task::yield_now().await;
        self.inner.zones_containing(kind, identifier).await
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64
}

impl ManualClock {
    pub fn starting_at(now_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicI64::new(now_ms)
        })
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance_ms(minutes * 60_000);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Evaluator answering from a table keyed by `(subject, resource)`, with a
/// fallback for everything else. Records each call for assertions.
pub struct ScriptedEvaluator {
    answers: HashMap<(String, String), PolicyEvaluationResult>,
    fallback: PolicyEvaluationResult,
    calls: Mutex<Vec<ScriptedCall>>
}

/// What the evaluator was handed on one call.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub request: EvaluationRequest,
    pub subject: Option<AttributeEntity>,
    pub resource: Option<AttributeEntity>
}

impl ScriptedEvaluator {
    pub fn new(fallback: PolicyEvaluationResult) -> Self {
        Self {
            answers: HashMap::new(),
            fallback,
            calls: Mutex::new(Vec::new())
        }
    }

    pub fn answer(
        mut self,
        subject: impl Into<String>,
        resource: impl Into<String>,
        result: PolicyEvaluationResult
    ) -> Self {
        self.answers.insert((subject.into(), resource.into()), result);
        self
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl PolicyEvaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        subject: Option<&AttributeEntity>,
        resource: Option<&AttributeEntity>
    ) -> anyhow::Result<PolicyEvaluationResult> {
        self.calls.lock().push(ScriptedCall {
            request: request.clone(),
            subject: subject.cloned(),
            resource: resource.cloned()
        });
        let answer = self
            .answers
            .get(&(
                request.subject_identifier.clone(),
                request.resource_identifier.clone()
            ))
            .unwrap_or(&self.fallback);
        Ok(answer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acs_core::types::Effect;

    #[tokio::test]
    async fn test_failing_store_always_errors() {
        let store = FailingKeyValueStore;
        assert!(store.get("k").await.is_err());
        assert!(store.multi_set(&[]).await.is_err());
    }

    #[test]
    fn test_manual_clock_moves_on_demand() {
        let clock = ManualClock::starting_at(1_000);
        clock.advance_minutes(2);
        assert_eq!(clock.now_ms(), 121_000);
    }

    #[tokio::test]
    async fn test_scripted_evaluator_records_calls() {
        let evaluator = ScriptedEvaluator::new(PolicyEvaluationResult::new(Effect::NotApplicable))
            .answer("mulder", "/x-files", PolicyEvaluationResult::new(Effect::Permit));
        let request = EvaluationRequest {
            zone_id: ZoneId::default(),
            subject_identifier: "mulder".to_string(),
            resource_identifier: "/x-files".to_string(),
            action: "GET".to_string(),
            subject_attributes: BTreeSet::new(),
            policy_set_ids: vec![]
        };

        let result = evaluator.evaluate(&request, None, None).await.unwrap();
        assert_eq!(result.effect, Effect::Permit);
        assert_eq!(evaluator.call_count(), 1);
    }
}
