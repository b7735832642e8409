//! Engine Builder
//!
//! Builder for constructing a [`TieredCache`] with custom tiers and
//! configuration.
//!
//! # Example: defaults (in-process local tier, no remote)
//!
//! ```rust,no_run
//! use tiered_cache::TieredCacheBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tiered_cache::CacheError> {
//!     let cache = TieredCacheBuilder::new().build().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Redis remote tier
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tiered_cache::{TieredCacheBuilder, backends::RedisTier};
//!
//! let redis = Arc::new(RedisTier::new().await?);
//! let cache = TieredCacheBuilder::new()
//!     .with_remote(redis)
//!     .build()
//!     .await?;
//! ```

use std::sync::Arc;

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::traits::{CacheTier, RemoteTier};
use crate::TieredCache;

/// Builder for [`TieredCache`].
///
/// Any [`CacheTier`] implementation can serve as the local tier and any
/// [`RemoteTier`] as the remote tier. When no local tier is supplied the
/// default backend is used (Moka when the `moka` feature is on, the in-process
/// memory tier otherwise). No remote tier is configured by default; without
/// one the engine runs in degraded local-only mode and cross-instance sync is
/// off.
#[derive(Default)]
pub struct TieredCacheBuilder {
    local: Option<Arc<dyn CacheTier>>,
    remote: Option<Arc<dyn RemoteTier>>,
    config: CacheConfig,
}

impl TieredCacheBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom local tier.
    #[must_use]
    pub fn with_local(mut self, local: Arc<dyn CacheTier>) -> Self {
        self.local = Some(local);
        self
    }

    /// Attach a shared remote tier.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteTier>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replace the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble the engine, start its background tasks and subscribe to the
    /// sync channel when a remote tier is present and sync is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CacheError::Subscribe`] when the sync subscription
    /// cannot be established.
    pub async fn build(self) -> CacheResult<TieredCache> {
        let local = self.local.unwrap_or_else(default_local_tier);
        TieredCache::assemble(local, self.remote, self.config).await
    }
}

#[cfg(feature = "moka")]
fn default_local_tier() -> Arc<dyn CacheTier> {
    Arc::new(crate::backends::MokaTier::default())
}

#[cfg(not(feature = "moka"))]
fn default_local_tier() -> Arc<dyn CacheTier> {
    Arc::new(crate::backends::MemoryTier::new())
}
