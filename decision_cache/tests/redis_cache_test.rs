//! Decision cache against Redis, with decisions and markers in separate
//! logical databases. Each test owns its decision database because
//! `reset_all` flushes it; markers share the fixture's marker database.

use std::sync::Arc;

use acs_core::traits::KeyValueStore;
use acs_core::types::{Effect, PolicyEvaluationResult};
use decision_cache::{DecisionCache, DecisionCacheKey, DefaultDecisionCache, StaticConnectorService};
use storage::RedisKeyValueStore;
use testing::ManualClock;

struct RedisCache {
    cache: DefaultDecisionCache,
    markers: Arc<RedisKeyValueStore>,
    clock: Arc<ManualClock>
}

async fn redis_cache(decision_db: u8) -> Option<RedisCache> {
    let Some(fixture) = testing::redis().await else {
        eprintln!("Skipping Redis test: Docker not available");
        return None;
    };
    let (decisions, markers) = fixture
        .cache_stores(decision_db)
        .await
        .expect("Failed to connect to Redis");
    let markers = Arc::new(markers);
    let clock = ManualClock::starting_at(1_700_000_000_000);
    let cache = DefaultDecisionCache::new(
        Arc::new(decisions),
        markers.clone(),
        Arc::new(StaticConnectorService::none())
    )
    .with_clock(clock.clone());
    Some(RedisCache {
        cache,
        markers,
        clock
    })
}

#[tokio::test]
async fn test_policy_set_reset_over_redis() {
    let Some(h) = redis_cache(0).await else {
        return;
    };
    let zone = testing::unique_zone();
    let key = DecisionCacheKey::builder(zone.clone())
        .subject("mulder")
        .resource("/x-files")
        .policy_sets(["p1"])
        .request("read")
        .build();

    h.cache
        .set(&key, PolicyEvaluationResult::new(Effect::Permit))
        .await
        .unwrap();
    let hit = h.cache.get(&key).await.unwrap().unwrap();
    assert_eq!(hit.effect(), Effect::Permit);

    h.clock.advance_ms(1);
    h.cache.reset_for_policy_set(&zone, "p1").await.unwrap();
    assert!(h.cache.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_flush_keeps_markers_over_redis() {
    let Some(h) = redis_cache(2).await else {
        return;
    };
    let zone = testing::unique_zone();
    let key = DecisionCacheKey::builder(zone.clone())
        .subject("scully")
        .resource("/autopsy")
        .policy_sets(["p2"])
        .request("read")
        .build();
    h.cache
        .set(&key, PolicyEvaluationResult::new(Effect::Deny))
        .await
        .unwrap();

    let marker = decision_cache::key::subject_marker_key(&zone, "scully");
    let before = h.markers.get(&marker).await.unwrap();
    assert!(before.is_some());

    h.cache.reset_all().await.unwrap();
    assert!(h.cache.get(&key).await.unwrap().is_none());
    assert_eq!(h.markers.get(&marker).await.unwrap(), before);
}
