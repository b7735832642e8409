//! Error taxonomy for the tiered cache engine.
//!
//! The read path is transparent: tier failures degrade to a miss and are never
//! surfaced to the caller. Write failures are surfaced only for strategies that
//! promise synchronous durability (`WriteThrough`, `LocalOnly`, `RemoteOnly`).

use thiserror::Error;

/// Errors surfaced by the cache engine.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The remote tier is unreachable or the circuit breaker is open.
    ///
    /// Never returned from the read path; reads convert this into a miss.
    #[error("remote tier unavailable: {reason}")]
    TierUnavailable { reason: String },

    /// A synchronous write was rejected by a tier.
    #[error("cache write failed: {context}")]
    WriteFailure {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// An outbound sync event could not be encoded. The publish is abandoned.
    #[error("failed to encode sync event")]
    SyncSerialization(#[from] serde_json::Error),

    /// Subscribing to the sync channel failed at engine construction.
    #[error("failed to subscribe to sync channel '{channel}'")]
    Subscribe {
        channel: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CacheError {
    pub(crate) fn write_failure(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::WriteFailure {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self::TierUnavailable {
            reason: reason.into(),
        }
    }
}

/// Result alias used across the engine surface.
pub type CacheResult<T> = Result<T, CacheError>;
