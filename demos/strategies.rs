//! Strategy Demo
//!
//! Shows how the routing strategies place data across the two tiers, using an
//! in-process memory tier as the "remote" store so no Redis is needed.
//!
//! Run with: cargo run --example strategies

use std::sync::Arc;
use std::time::Duration;
use tiered_cache::backends::MemoryTier;
use tiered_cache::{CacheTier, RemoteTier, Strategy, TieredCacheBuilder};

#[tokio::main]
async fn main() -> Result<(), tiered_cache::CacheError> {
    tracing_subscriber::fmt()
        .with_env_filter("tiered_cache=info")
        .init();

    let remote = Arc::new(MemoryTier::new());
    let cache = TieredCacheBuilder::new()
        .with_local(Arc::new(MemoryTier::new()))
        .with_remote(Arc::clone(&remote) as Arc<dyn RemoteTier>)
        .build()
        .await?;

    // WriteThrough lands in both tiers before returning.
    cache
        .put("wt", serde_json::json!("both tiers"), Strategy::WriteThrough, None)
        .await?;
    println!("WriteThrough: remote has key = {}", remote.contains_key("wt").await);

    // WriteBehind returns after the local write; the remote copy follows.
    cache
        .put("wb", serde_json::json!("local now, remote soon"), Strategy::WriteBehind, None)
        .await?;
    println!("WriteBehind right away: remote has key = {}", remote.contains_key("wb").await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("WriteBehind after 100ms: remote has key = {}", remote.contains_key("wb").await);

    // A remote hit is backfilled into the local tier off the read path.
    remote
        .put("seeded", serde_json::json!("from a peer"), Some(Duration::from_secs(60)))
        .await
        .map_err(|e| tiered_cache::CacheError::WriteFailure {
            context: "seed remote".into(),
            source: e,
        })?;
    let value = cache.get("seeded", Strategy::RemoteFirst).await;
    println!("RemoteFirst read of seeded key: {value:?}");
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!(
        "local copy after backfill: {:?}",
        cache.get("seeded", Strategy::LocalOnly).await
    );

    cache.shutdown().await;
    Ok(())
}
