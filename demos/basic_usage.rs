//! Basic Usage Demo
//!
//! Put, get, evict and stats against an in-process engine.
//!
//! Run with: cargo run --example basic_usage

use tiered_cache::{Strategy, TieredCacheBuilder};

#[tokio::main]
async fn main() -> Result<(), tiered_cache::CacheError> {
    tracing_subscriber::fmt()
        .with_env_filter("tiered_cache=info")
        .init();

    let cache = TieredCacheBuilder::new().build().await?;

    let user = serde_json::json!({"name": "alice", "score": 100});
    cache.put("user:1", user, Strategy::LocalFirst, None).await?;
    println!("stored user:1");

    match cache.get("user:1", Strategy::LocalFirst).await {
        Some(value) => println!("hit: {value}"),
        None => println!("miss"),
    }

    cache.evict("user:1", Strategy::LocalFirst).await?;
    println!("evicted user:1, lookup now: {:?}", cache.get("user:1", Strategy::LocalFirst).await);

    let stats = cache.stats();
    println!(
        "requests={} hits={} misses={} hit_rate={:.2}",
        stats.total_requests, stats.total_hits, stats.misses, stats.hit_rate
    );

    cache.shutdown().await;
    Ok(())
}
