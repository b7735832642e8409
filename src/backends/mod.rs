//! Tier backend implementations.
//!
//! The engine is backend-agnostic; anything implementing [`crate::traits::CacheTier`]
//! (or [`crate::traits::RemoteTier`] for the shared tier) plugs in. This module
//! ships three ready-made backends:
//!
//! - **Moka** (feature `moka`, default) - concurrent in-memory local tier with
//!   capacity-bound eviction and per-key TTL
//! - **Redis** (feature `redis`, default) - shared remote tier with Pub/Sub
//!   for cross-instance sync, backed by `ConnectionManager` for automatic
//!   reconnection
//! - **Memory** (always available) - `DashMap`-based tier that also emulates
//!   the remote surface in-process, used as a fallback local tier and in tests

pub mod memory;

#[cfg(feature = "moka")]
pub mod moka_local;

#[cfg(feature = "redis")]
pub mod redis_remote;

pub use memory::MemoryTier;

#[cfg(feature = "moka")]
pub use moka_local::{MokaTier, MokaTierConfig};

#[cfg(feature = "redis")]
pub use redis_remote::RedisTier;
