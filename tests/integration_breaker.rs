//! Integration tests for circuit breaking around the remote tier.

mod common;

use common::{engine_with_remote, test_key, wait_for, wait_for_async, FlakyRemote};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tiered_cache::backends::MemoryTier;
use tiered_cache::{
    BreakerConfig, CacheConfig, CacheError, RemoteTier, Strategy, SyncConfig, TieredCache,
    TieredCacheBuilder,
};

async fn engine_with_flaky(remote: Arc<FlakyRemote>, breaker: BreakerConfig) -> TieredCache {
    let config = CacheConfig {
        breaker,
        ..CacheConfig::default()
    };
    TieredCacheBuilder::new()
        .with_local(Arc::new(MemoryTier::new()))
        .with_remote(remote as Arc<dyn RemoteTier>)
        .with_config(config)
        .build()
        .await
        .expect("engine setup failed")
}

#[tokio::test]
async fn breaker_trips_after_threshold_and_short_circuits_remote_calls() {
    let remote = Arc::new(FlakyRemote::new(Arc::new(MemoryTier::new())));
    let cache = engine_with_flaky(
        Arc::clone(&remote),
        BreakerConfig {
            failure_threshold: 5,
            reset_interval: Duration::from_secs(300),
        },
    )
    .await;
    let key = test_key("trip");

    remote.set_failing(true);
    for _ in 0..5 {
        assert_eq!(cache.get(&key, Strategy::RemoteFirst).await, None);
    }
    assert!(cache.is_circuit_open());

    // While open, remote calls are skipped entirely.
    let calls_when_opened = remote.data_calls();
    for _ in 0..3 {
        let _ = cache.get(&key, Strategy::RemoteFirst).await;
    }
    assert_eq!(remote.data_calls(), calls_when_opened);

    // Writes that would front the remote tier land locally instead.
    cache
        .put(&key, json!("fallback"), Strategy::RemoteOnly, None)
        .await
        .unwrap();
    assert_eq!(
        cache.get(&key, Strategy::LocalOnly).await,
        Some(json!("fallback"))
    );
    assert_eq!(remote.data_calls(), calls_when_opened);

    cache.shutdown().await;
}

#[tokio::test]
async fn breaker_closes_on_the_reset_timer() {
    let remote = Arc::new(FlakyRemote::new(Arc::new(MemoryTier::new())));
    let cache = engine_with_flaky(
        Arc::clone(&remote),
        BreakerConfig {
            failure_threshold: 2,
            reset_interval: Duration::from_millis(200),
        },
    )
    .await;
    let key = test_key("reset");

    remote.set_failing(true);
    let _ = cache.get(&key, Strategy::RemoteFirst).await;
    let _ = cache.get(&key, Strategy::RemoteFirst).await;
    assert!(cache.is_circuit_open());

    // The timer closes the breaker blindly; with the fault gone the remote
    // tier is reachable again.
    remote.set_failing(false);
    let closed = wait_for(Duration::from_secs(2), || !cache.is_circuit_open()).await;
    assert!(closed, "breaker never closed on the reset timer");

    cache
        .put(&key, json!("recovered"), Strategy::RemoteOnly, None)
        .await
        .unwrap();
    assert_eq!(
        cache.get(&key, Strategy::RemoteOnly).await,
        Some(json!("recovered"))
    );

    cache.shutdown().await;
}

#[tokio::test]
async fn breaker_reopens_when_the_fault_persists() {
    let remote = Arc::new(FlakyRemote::new(Arc::new(MemoryTier::new())));
    let cache = engine_with_flaky(
        Arc::clone(&remote),
        BreakerConfig {
            failure_threshold: 2,
            reset_interval: Duration::from_millis(500),
        },
    )
    .await;
    let key = test_key("reopen");

    remote.set_failing(true);
    let _ = cache.get(&key, Strategy::RemoteFirst).await;
    let _ = cache.get(&key, Strategy::RemoteFirst).await;
    assert!(cache.is_circuit_open());

    // Still failing after the reset tick; a couple of calls re-open it.
    let closed = wait_for(Duration::from_secs(2), || !cache.is_circuit_open()).await;
    assert!(closed);
    let _ = cache.get(&key, Strategy::RemoteFirst).await;
    let _ = cache.get(&key, Strategy::RemoteFirst).await;
    assert!(cache.is_circuit_open());

    cache.shutdown().await;
}

#[tokio::test]
async fn reset_ticks_zero_sub_threshold_failure_counts() {
    let remote = Arc::new(FlakyRemote::new(Arc::new(MemoryTier::new())));
    let cache = engine_with_flaky(
        Arc::clone(&remote),
        BreakerConfig {
            failure_threshold: 2,
            reset_interval: Duration::from_millis(100),
        },
    )
    .await;
    let key = test_key("isolated");

    // Two failures far apart are not consecutive: the reset timer zeroes the
    // count several times in between, so the breaker stays closed.
    remote.set_failing(true);
    let _ = cache.get(&key, Strategy::RemoteFirst).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let _ = cache.get(&key, Strategy::RemoteFirst).await;
    assert!(!cache.is_circuit_open());

    cache.shutdown().await;
}

#[tokio::test]
async fn breaker_open_fallback_writes_are_broadcast_to_peers() {
    let inner = Arc::new(MemoryTier::new());
    let flaky = Arc::new(FlakyRemote::new(Arc::clone(&inner)));
    let config = CacheConfig {
        breaker: BreakerConfig {
            failure_threshold: 1,
            reset_interval: Duration::from_secs(300),
        },
        sync: SyncConfig {
            node_id: "node-a".to_string(),
            ..SyncConfig::default()
        },
        ..CacheConfig::default()
    };
    let a = TieredCacheBuilder::new()
        .with_local(Arc::new(MemoryTier::new()))
        .with_remote(Arc::clone(&flaky) as Arc<dyn RemoteTier>)
        .with_config(config)
        .build()
        .await
        .expect("engine setup failed");
    let b = engine_with_remote(
        Arc::clone(&inner),
        CacheConfig {
            sync: SyncConfig {
                node_id: "node-b".to_string(),
                ..SyncConfig::default()
            },
            ..CacheConfig::default()
        },
    )
    .await;
    let key = test_key("open_fallback");

    flaky.set_failing(true);
    let _ = a.get(&key, Strategy::RemoteFirst).await;
    assert!(a.is_circuit_open());

    // The write fronts the remote tier but falls back to the local tier while
    // the breaker is open; peers mirror local mutations, so it is announced.
    a.put(&key, json!("fell back"), Strategy::RemoteOnly, None)
        .await
        .unwrap();
    let converged = wait_for_async(Duration::from_secs(2), || async {
        b.get(&key, Strategy::LocalOnly).await == Some(json!("fell back"))
    })
    .await;
    assert!(converged, "peer never received the fallback PUT event");

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn remote_only_write_failure_surfaces_when_breaker_is_closed() {
    let remote = Arc::new(FlakyRemote::new(Arc::new(MemoryTier::new())));
    let cache = engine_with_flaky(
        Arc::clone(&remote),
        BreakerConfig {
            failure_threshold: 50,
            reset_interval: Duration::from_secs(300),
        },
    )
    .await;
    let key = test_key("strict_write");

    remote.set_failing(true);
    let err = cache
        .put(&key, json!("rejected"), Strategy::RemoteOnly, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::WriteFailure { .. }));

    cache.shutdown().await;
}

#[tokio::test]
async fn write_through_surfaces_remote_failure_after_local_write() {
    let remote = Arc::new(FlakyRemote::new(Arc::new(MemoryTier::new())));
    let cache = engine_with_flaky(
        Arc::clone(&remote),
        BreakerConfig {
            failure_threshold: 50,
            reset_interval: Duration::from_secs(300),
        },
    )
    .await;
    let key = test_key("half_write");

    remote.set_failing(true);
    let err = cache
        .put(&key, json!("half"), Strategy::WriteThrough, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::WriteFailure { .. }));

    // The local half already landed; the tiers diverge until TTL or rewrite.
    assert_eq!(cache.get(&key, Strategy::LocalOnly).await, Some(json!("half")));

    cache.shutdown().await;
}

#[tokio::test]
async fn local_first_swallows_remote_failures_entirely() {
    let remote = Arc::new(FlakyRemote::new(Arc::new(MemoryTier::new())));
    let cache = engine_with_flaky(
        Arc::clone(&remote),
        BreakerConfig {
            failure_threshold: 50,
            reset_interval: Duration::from_secs(300),
        },
    )
    .await;
    let key = test_key("swallow");

    remote.set_failing(true);
    cache
        .put(&key, json!("still fine"), Strategy::LocalFirst, None)
        .await
        .unwrap();
    assert_eq!(
        cache.get(&key, Strategy::LocalFirst).await,
        Some(json!("still fine"))
    );

    cache.shutdown().await;
}
