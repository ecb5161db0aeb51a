//! Store capability contract.
//!
//! The queue engine only needs a handful of list, set and expiring-key
//! primitives from its backing store. This module defines them as the
//! [`Store`] trait so that the Redis implementation and the in-memory fake
//! can be used interchangeably.

mod memory_backend;
mod redis_backend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::StoreConfig;

pub use self::memory_backend::MemoryStore;
pub use self::redis_backend::RedisStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Store is temporarily unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Capability contract the queue engine requires from its store.
///
/// Lists are pushed on the left and consumed from the right, so the right
/// end of a list always holds its oldest entry.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single handle is shared by the
/// heartbeat, every poller and every consumer task of a connection without
/// additional locking. Only per-command atomicity is assumed.
#[async_trait]
pub trait Store: Send + Sync {
    /// Push `value` on the left end of list `key`. Returns the new length.
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize>;

    /// Pop the oldest entry of `source` and push it on the left end of
    /// `destination`. Returns `None` when `source` is empty.
    async fn move_tail(&self, source: &str, destination: &str) -> StoreResult<Option<String>>;

    /// Remove up to `count` occurrences of `value` from list `key`
    /// (`count > 0` scans from the left, `count < 0` from the right,
    /// `0` removes all). Returns the number removed.
    async fn lrem(&self, key: &str, count: isize, value: &str) -> StoreResult<usize>;

    /// Length of list `key` (0 when missing).
    async fn llen(&self, key: &str) -> StoreResult<usize>;

    /// Delete `key`. Returns whether it existed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Set `key` to `value`, expiring after `ttl`. Calling it again refreshes
    /// the expiry.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Whether `key` exists and has not expired.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Add `member` to set `key`. Returns whether it was newly added.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove `member` from set `key`. Returns whether it was present.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// All members of set `key`, in no particular order.
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;
}

/// Create a store based on configuration.
///
/// Returns the appropriate implementation based on the `backend` setting:
/// - `"redis"` (default): a [`RedisStore`] connected lazily to `url`
/// - `"memory"`: a process-local [`MemoryStore`]
pub fn create_store(config: &StoreConfig) -> StoreResult<Arc<dyn Store>> {
    match config.backend.as_str() {
        "memory" => {
            tracing::info!(backend = "memory", "Creating in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        "redis" => {
            tracing::info!(backend = "redis", url = %config.url, "Creating Redis store");
            Ok(Arc::new(RedisStore::new(&config.url)?))
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown store backend, falling back to redis"
            );
            Ok(Arc::new(RedisStore::new(&config.url)?))
        }
    }
}
