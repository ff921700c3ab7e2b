//! Integration tests for the PostgreSQL attribute-entity store

use acs_core::traits::AttributeEntityStore;
use acs_core::types::{Attribute, AttributeEntity, EntityKind, UpsertOutcome, ZoneId};
use storage::PostgresAttributeStore;

async fn store() -> Option<PostgresAttributeStore> {
    let Some(fixture) = testing::postgres().await else {
        eprintln!("Skipping PostgreSQL test: Docker not available");
        return None;
    };
    Some(
        fixture
            .attribute_store()
            .await
            .expect("Failed to open attribute store")
    )
}

fn zone() -> ZoneId {
    ZoneId::new(testing::unique_id("zone")).unwrap()
}

#[tokio::test]
async fn test_postgres_upsert_and_get() {
    let Some(store) = store().await else {
        return;
    };
    let zone = zone();
    let parent = AttributeEntity::resource(zone.clone(), "/site");
    let child = AttributeEntity::resource(zone.clone(), "/site/x-files")
        .with_attribute(Attribute::new("acs", "classification", "top-secret"))
        .with_parent("/site");

    assert_eq!(store.upsert(&parent).await.unwrap(), UpsertOutcome::Created);
    assert_eq!(store.upsert(&child).await.unwrap(), UpsertOutcome::Created);
    assert_eq!(store.upsert(&child).await.unwrap(), UpsertOutcome::Updated);

    let loaded = store
        .get(&zone, EntityKind::Resource, "/site/x-files")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, child);

    let missing = store.get(&zone, EntityKind::Subject, "/site/x-files").await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_postgres_upsert_replaces_parent_edges() {
    let Some(store) = store().await else {
        return;
    };
    let zone = zone();
    for id in ["A", "B"] {
        store.upsert(&AttributeEntity::subject(zone.clone(), id)).await.unwrap();
    }
    store
        .upsert(&AttributeEntity::subject(zone.clone(), "C").with_parent("A"))
        .await
        .unwrap();
    store
        .upsert(&AttributeEntity::subject(zone.clone(), "C").with_parent("B"))
        .await
        .unwrap();

    assert!(store.children(&zone, EntityKind::Subject, "A").await.unwrap().is_empty());
    let children = store.children(&zone, EntityKind::Subject, "B").await.unwrap();
    assert!(children.contains("C"));
}

#[tokio::test]
async fn test_postgres_delete_removes_edges() {
    let Some(store) = store().await else {
        return;
    };
    let zone = zone();
    store.upsert(&AttributeEntity::subject(zone.clone(), "A")).await.unwrap();
    store
        .upsert(&AttributeEntity::subject(zone.clone(), "B").with_parent("A"))
        .await
        .unwrap();

    assert!(store.delete(&zone, EntityKind::Subject, "A").await.unwrap());
    assert!(!store.delete(&zone, EntityKind::Subject, "A").await.unwrap());

    let b = store.get(&zone, EntityKind::Subject, "B").await.unwrap().unwrap();
    assert!(b.parents.is_empty());
}

#[tokio::test]
async fn test_postgres_list_and_zones_containing() {
    let Some(store) = store().await else {
        return;
    };
    let zone_a = zone();
    let zone_b = zone();
    let shared = testing::unique_id("shared");
    store.upsert(&AttributeEntity::resource(zone_a.clone(), shared.clone())).await.unwrap();
    store.upsert(&AttributeEntity::resource(zone_b.clone(), shared.clone())).await.unwrap();
    store.upsert(&AttributeEntity::resource(zone_a.clone(), "/other")).await.unwrap();

    let listed = store.list(&zone_a, EntityKind::Resource).await.unwrap();
    assert_eq!(listed.len(), 2);

    let zones = store.zones_containing(EntityKind::Resource, &shared).await.unwrap();
    assert!(zones.contains(&zone_a));
    assert!(zones.contains(&zone_b));
}
