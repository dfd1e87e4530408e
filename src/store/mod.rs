//! Ephemeral key-value store used to coordinate request handlers and the worker
//!
//! The store is the only synchronization point in the system. Implementations
//! must make each single-key operation atomic; nothing here spans keys.

pub mod keys;
pub mod memory;

pub use memory::InMemoryEphemeralStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for the TTL-capable store operations the service relies on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Append to the tail of a list, returning the new length
    async fn rpush(&self, key: &str, value: String) -> Result<usize>;

    /// Prepend to the head of a list, returning the new length
    async fn lpush(&self, key: &str, value: String) -> Result<usize>;

    /// Pop the head of a list
    async fn lpop(&self, key: &str) -> Result<Option<String>>;

    /// Length of a list (0 when absent)
    async fn llen(&self, key: &str) -> Result<usize>;

    /// Add a member to a set, returning whether it was newly added
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    /// All members of a set (empty when absent)
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Read a string value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value that expires after `ttl`
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Reset the expiry of an existing key, returning whether the key existed
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining lifetime of a key; `None` when absent or persistent
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}
