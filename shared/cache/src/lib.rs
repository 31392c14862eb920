//! Distributed cache with a typed lookup layer
//!
//! Two surfaces:
//!
//! - Raw primitives on [`SharedStore`]: `kv_{get,set,del}`,
//!   `set_{add,members,remove}` and atomic `set_nx` (the replay guard's
//!   building block). Backed by Redis in production, by an in-process map in
//!   tests and single-node deployments.
//! - [`LookupCache`]: keyed read-through cache with a small local moka layer,
//!   the distributed store behind it, per-key single-flight lookups, and
//!   cross-node invalidation over a pub/sub channel. Subscribers ignore their
//!   own node id.

pub mod invalidation;
pub mod memory_store;
pub mod redis_store;
pub mod store;
pub mod typed;

pub use invalidation::{node_id, InvalidationHub, InvalidationMessage, INVALIDATION_CHANNEL};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{SetNxOutcome, SharedStore};
pub use typed::{CacheKey, LookupCache};

use shared_error::AppError;

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    RedisError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::Internal(format!("Cache backend error: {}", err))
    }
}
