//! Key-Value Store Boundary
//!
//! The upload core keeps all of its shared state (session metadata, chunk
//! records, the deletion queue) in an external key-value store. This module
//! defines the small command surface it needs and ships two backends:
//!
//! - `RedisKvStore`: production backend on top of a multiplexed Redis connection
//! - `MemoryKvStore`: in-process backend for tests and single-node development

mod memory;
mod redis_store;

use std::collections::HashMap;
use std::time::Duration;

pub use memory::MemoryKvStore;
pub use redis_store::RedisKvStore;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by a store backend
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            KvError::Connection(e.to_string())
        } else {
            KvError::Command(e.to_string())
        }
    }
}

// ============================================================================
// TTL
// ============================================================================

/// Remaining lifetime of a key, as reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

impl KeyTtl {
    /// Map a Redis `TTL` reply (-2 missing, -1 no expiry) onto `KeyTtl`
    pub fn from_seconds(secs: i64) -> Self {
        match secs {
            -2 => KeyTtl::Missing,
            s if s < 0 => KeyTtl::Persistent,
            s => KeyTtl::Expires(Duration::from_secs(s as u64)),
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Commands the upload core issues against the shared store.
///
/// Every command is atomic on a single key. `zpop_by_score` is the only
/// compound command and must read and remove the due range in one step.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Get a string value
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set a string value with an expiry
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Remaining lifetime of a key
    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError>;

    /// Set the expiry of an existing key, returns false if the key is missing
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Set a field of a hash
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;

    /// Get a field of a hash
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;

    /// Get every field of a hash (empty map if the key is missing)
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError>;

    /// Add or re-score a sorted-set member
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), KvError>;

    /// Remove a sorted-set member
    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvError>;

    /// Atomically read and remove every member with `score <= max_score`,
    /// returned in ascending score order
    async fn zpop_by_score(&self, key: &str, max_score: i64) -> Result<Vec<String>, KvError>;
}
