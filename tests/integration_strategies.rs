//! Integration tests for strategy routing over in-process tiers.

mod common;

use common::{engine_local_only, engine_with_remote, test_key, wait_for_async};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tiered_cache::backends::MemoryTier;
use tiered_cache::{CacheConfig, CacheTier, Strategy};

#[tokio::test]
async fn local_first_write_reaches_remote_asynchronously() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("local_first");

    cache
        .put(&key, json!({"n": 1}), Strategy::LocalFirst, None)
        .await
        .unwrap();

    // Local copy is visible immediately.
    assert_eq!(
        cache.get(&key, Strategy::LocalFirst).await,
        Some(json!({"n": 1}))
    );

    // The remote copy arrives through the replication pool.
    let replicated = wait_for_async(Duration::from_secs(2), || {
        let remote = Arc::clone(&remote);
        let key = key.clone();
        async move { remote.contains_key(&key).await }
    })
    .await;
    assert!(replicated, "write-behind copy never reached the remote tier");

    cache.shutdown().await;
}

#[tokio::test]
async fn write_through_lands_in_both_tiers() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("write_through");

    cache
        .put(&key, json!("both"), Strategy::WriteThrough, None)
        .await
        .unwrap();

    assert!(remote.contains_key(&key).await);
    assert_eq!(cache.get(&key, Strategy::LocalOnly).await, Some(json!("both")));

    cache.shutdown().await;
}

#[tokio::test]
async fn remote_hit_is_backfilled_into_local_tier() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("backfill");

    // Seed the remote tier directly, as a peer instance would have.
    remote
        .put(&key, json!(42), Some(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(cache.get(&key, Strategy::RemoteFirst).await, Some(json!(42)));

    // The backfill runs off the read path; the local copy shows up shortly.
    let backfilled = wait_for_async(Duration::from_secs(2), || async {
        cache.get(&key, Strategy::LocalOnly).await.is_some()
    })
    .await;
    assert!(backfilled, "remote hit was never backfilled locally");

    cache.shutdown().await;
}

#[tokio::test]
async fn local_only_never_touches_the_remote_tier() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("local_only");

    cache
        .put(&key, json!("private"), Strategy::LocalOnly, None)
        .await
        .unwrap();
    assert_eq!(
        cache.get(&key, Strategy::LocalOnly).await,
        Some(json!("private"))
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!remote.contains_key(&key).await);

    cache.shutdown().await;
}

#[tokio::test]
async fn remote_only_round_trip_skips_the_local_tier() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("remote_only");

    cache
        .put(&key, json!("shared"), Strategy::RemoteOnly, None)
        .await
        .unwrap();

    assert_eq!(
        cache.get(&key, Strategy::RemoteOnly).await,
        Some(json!("shared"))
    );
    assert_eq!(cache.get(&key, Strategy::LocalOnly).await, None);

    cache.shutdown().await;
}

#[tokio::test]
async fn write_behind_is_eventually_visible_remotely() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("write_behind");

    cache
        .put(&key, json!([1, 2, 3]), Strategy::WriteBehind, None)
        .await
        .unwrap();
    assert_eq!(
        cache.get(&key, Strategy::LocalFirst).await,
        Some(json!([1, 2, 3]))
    );

    let replicated = wait_for_async(Duration::from_secs(2), || {
        let remote = Arc::clone(&remote);
        let key = key.clone();
        async move { remote.contains_key(&key).await }
    })
    .await;
    assert!(replicated);

    cache.shutdown().await;
}

#[tokio::test]
async fn remote_strategies_degrade_without_a_remote_tier() {
    let cache = engine_local_only(CacheConfig::default()).await;
    let key = test_key("degraded");

    // Writes land locally instead of failing.
    cache
        .put(&key, json!("fallback"), Strategy::RemoteOnly, None)
        .await
        .unwrap();
    assert_eq!(
        cache.get(&key, Strategy::LocalOnly).await,
        Some(json!("fallback"))
    );

    // RemoteFirst reads fall back to the local copy.
    assert_eq!(
        cache.get(&key, Strategy::RemoteFirst).await,
        Some(json!("fallback"))
    );

    // RemoteOnly reads are a clean miss, never an error.
    assert_eq!(cache.get(&key, Strategy::RemoteOnly).await, None);

    cache.shutdown().await;
}

#[tokio::test]
async fn evict_removes_the_key_from_both_tiers() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("evict");

    cache
        .put(&key, json!("doomed"), Strategy::WriteThrough, None)
        .await
        .unwrap();
    cache.evict(&key, Strategy::WriteThrough).await.unwrap();

    assert_eq!(cache.get(&key, Strategy::LocalFirst).await, None);
    assert!(!remote.contains_key(&key).await);

    cache.shutdown().await;
}

#[tokio::test]
async fn clear_empties_both_tiers() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;

    for i in 0..5 {
        cache
            .put(&test_key(&format!("clear_{i}")), json!(i), Strategy::WriteThrough, None)
            .await
            .unwrap();
    }
    assert!(remote.size().await >= 5);

    cache.clear().await.unwrap();
    assert_eq!(remote.size().await, 0);
    assert_eq!(cache.local_tier_stats().puts, 5);

    cache.shutdown().await;
}

#[tokio::test]
async fn batch_operations_route_like_their_single_key_forms() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;

    let keys: Vec<String> = (0..3).map(|i| test_key(&format!("batch_{i}"))).collect();
    let entries: HashMap<String, serde_json::Value> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.clone(), json!(i)))
        .collect();

    cache
        .multi_put(entries.clone(), Strategy::WriteThrough, None)
        .await
        .unwrap();

    let found = cache.multi_get(&keys, Strategy::LocalFirst).await;
    assert_eq!(found, entries);

    // One absent key leaves a hole, not an error.
    let mut with_absent = keys.clone();
    with_absent.push(test_key("batch_absent"));
    let found = cache.multi_get(&with_absent, Strategy::LocalFirst).await;
    assert_eq!(found.len(), keys.len());

    cache.multi_evict(&keys, Strategy::WriteThrough).await.unwrap();
    assert!(cache.multi_get(&keys, Strategy::LocalFirst).await.is_empty());
    assert!(!remote.contains_key(&keys[0]).await);

    cache.shutdown().await;
}

#[tokio::test]
async fn stats_count_hits_misses_and_tier_of_origin() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("stats");

    cache
        .put(&key, json!("x"), Strategy::LocalFirst, None)
        .await
        .unwrap();
    assert!(cache.get(&key, Strategy::LocalFirst).await.is_some());
    assert!(cache.get(&test_key("stats_absent"), Strategy::LocalFirst).await.is_none());

    let stats = cache.stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.local_hits, 1);
    assert_eq!(stats.misses, 1);

    cache.reset_stats();
    assert_eq!(cache.stats().total_requests, 0);

    cache.shutdown().await;
}

#[tokio::test]
async fn ttl_expires_entries_in_both_tiers() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("ttl");

    cache
        .put(
            &key,
            json!("fleeting"),
            Strategy::WriteThrough,
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    assert!(cache.get(&key, Strategy::LocalFirst).await.is_some());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.get(&key, Strategy::LocalFirst).await, None);
    assert!(!remote.contains_key(&key).await);

    cache.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_pending_write_behind_work() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(Arc::clone(&remote), CacheConfig::default()).await;
    let key = test_key("shutdown_drain");

    cache
        .put(&key, json!("late"), Strategy::WriteBehind, None)
        .await
        .unwrap();
    cache.shutdown().await;

    assert!(remote.contains_key(&key).await);

    // Idempotent; a second call is a no-op.
    cache.shutdown().await;

    // Data operations still work against the local tier afterwards.
    cache
        .put(&key, json!("after"), Strategy::LocalOnly, None)
        .await
        .unwrap();
    assert_eq!(cache.get(&key, Strategy::LocalOnly).await, Some(json!("after")));
}

#[tokio::test]
async fn health_check_reports_healthy_with_and_without_remote() {
    let remote = Arc::new(MemoryTier::new());
    let cache = engine_with_remote(remote, CacheConfig::default()).await;
    assert!(cache.health_check().await);
    cache.shutdown().await;

    let local_only = engine_local_only(CacheConfig::default()).await;
    assert!(local_only.health_check().await);
    local_only.shutdown().await;
}
