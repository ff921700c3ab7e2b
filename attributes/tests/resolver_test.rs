//! Resolver behaviour over real and contended stores.

use std::sync::Arc;
use std::time::Duration;

use acs_core::traits::AttributeEntityStore;
use acs_core::types::{Attribute, AttributeEntity, EntityKind, UpsertOutcome};
use attributes::{HierarchicalAttributeResolver, ResolverSettings};
use errors::{AttributeStoreError, StorageError};
use storage::InMemoryAttributeStore;
use testing::{ContendedAttributeStore, YieldingAttributeStore};

fn settings(attempts: usize) -> ResolverSettings {
    ResolverSettings {
        contention_retry_attempts: attempts,
        contention_retry_delay: Duration::from_millis(1),
        ..ResolverSettings::default()
    }
}

#[tokio::test]
async fn test_contended_write_is_retried() {
    let store = Arc::new(ContendedAttributeStore::new(
        Arc::new(InMemoryAttributeStore::new()),
        2
    ));
    let resolver = HierarchicalAttributeResolver::new(store.clone(), settings(3));

    let outcome = resolver
        .upsert(&AttributeEntity::subject(testing::unique_zone(), "mulder"))
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Created);
    assert_eq!(store.upsert_attempts(), 3);
}

#[tokio::test]
async fn test_concurrent_opposing_edges_cannot_form_a_cycle() {
    let inner: Arc<dyn AttributeEntityStore> = Arc::new(InMemoryAttributeStore::new());
    let resolver = HierarchicalAttributeResolver::new(
        Arc::new(YieldingAttributeStore::new(inner.clone())),
        ResolverSettings::default()
    );
    let zone = testing::unique_zone();
    for id in ["A", "B"] {
        resolver.upsert(&AttributeEntity::subject(zone.clone(), id)).await.unwrap();
    }

    let a_under_b = AttributeEntity::subject(zone.clone(), "A").with_parent("B");
    let b_under_a = AttributeEntity::subject(zone.clone(), "B").with_parent("A");
    let (first, second) = tokio::join!(resolver.upsert(&a_under_b), resolver.upsert(&b_under_a));

    assert!(first.is_ok());
    assert!(matches!(second, Err(AttributeStoreError::CyclicReference { .. })));
    let a = inner.get(&zone, EntityKind::Subject, "A").await.unwrap().unwrap();
    let b = inner.get(&zone, EntityKind::Subject, "B").await.unwrap().unwrap();
    assert!(a.parents.contains("B"));
    assert!(b.parents.is_empty());
}

#[tokio::test]
async fn test_concurrent_writes_in_separate_zones_both_land() {
    let resolver = Arc::new(HierarchicalAttributeResolver::new(
        Arc::new(YieldingAttributeStore::new(Arc::new(InMemoryAttributeStore::new()))),
        ResolverSettings::default()
    ));
    let (zone_a, zone_b) = (testing::unique_zone(), testing::unique_zone());

    let entity_a = AttributeEntity::subject(zone_a, "mulder");
    let entity_b = AttributeEntity::subject(zone_b, "mulder");
    let (a, b) = tokio::join!(resolver.upsert(&entity_a), resolver.upsert(&entity_b));
    assert_eq!(a.unwrap(), UpsertOutcome::Created);
    assert_eq!(b.unwrap(), UpsertOutcome::Created);
}

#[tokio::test]
async fn test_contention_surfaces_after_bounded_attempts() {
    let store = Arc::new(ContendedAttributeStore::new(
        Arc::new(InMemoryAttributeStore::new()),
        10
    ));
    let resolver = HierarchicalAttributeResolver::new(store.clone(), settings(3));

    let err = resolver
        .upsert(&AttributeEntity::subject(testing::unique_zone(), "mulder"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AttributeStoreError::Storage(StorageError::LockContention { .. })
    ));
    // One initial attempt plus three retries.
    assert_eq!(store.upsert_attempts(), 4);
}

#[tokio::test]
async fn test_resolver_over_postgres() {
    let Some(fixture) = testing::postgres().await else {
        eprintln!("Skipping PostgreSQL test: Docker not available");
        return;
    };
    let store: Arc<dyn AttributeEntityStore> = Arc::new(
        fixture
            .attribute_store()
            .await
            .expect("Failed to open attribute store")
    );
    let resolver = HierarchicalAttributeResolver::new(store, ResolverSettings::default());
    let zone = testing::unique_zone();

    resolver
        .upsert(
            &AttributeEntity::resource(zone.clone(), "/site")
                .with_attribute(Attribute::new("acs", "site", "basement"))
        )
        .await
        .unwrap();
    resolver
        .upsert(
            &AttributeEntity::resource(zone.clone(), "/site/x-files")
                .with_attribute(Attribute::new("acs", "classification", "secret"))
                .with_parent("/site")
        )
        .await
        .unwrap();

    let effective = resolver
        .get_with_inherited_attributes(&zone, EntityKind::Resource, "/site/x-files")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(effective.attributes.len(), 2);

    let descendants = resolver
        .get_descendant_ids(&zone, EntityKind::Resource, "/site")
        .await
        .unwrap();
    assert_eq!(descendants.len(), 2);

    let cycle = resolver
        .upsert(&AttributeEntity::resource(zone.clone(), "/site").with_parent("/site/x-files"))
        .await
        .unwrap_err();
    assert!(matches!(cycle, AttributeStoreError::CyclicReference { .. }));
}
