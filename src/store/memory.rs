//! In-memory implementation of the ephemeral store
//!
//! Keys expire lazily on access and eagerly through [`InMemoryEphemeralStore::purge_expired`],
//! which the service calls from a background sweep. Expiry uses the tokio clock so
//! tests can drive it with a paused runtime.

use crate::error::{MatchmakingError, Result};
use crate::store::EphemeralStore;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory store with per-key expiry
#[derive(Debug, Default)]
pub struct InMemoryEphemeralStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryEphemeralStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries.read().map_err(|_| {
            MatchmakingError::store_unavailable("read", "Failed to acquire store read lock").into()
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries.write().map_err(|_| {
            MatchmakingError::store_unavailable("write", "Failed to acquire store write lock")
                .into()
        })
    }

    /// Drop every expired key, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }

    /// Number of live keys
    pub fn key_count(&self) -> Result<usize> {
        let now = Instant::now();
        let entries = self.read()?;
        Ok(entries.values().filter(|e| !e.is_expired(now)).count())
    }

    /// Remove the key if it has expired so callers only see live entries
    fn evict_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
    }

    fn push(&self, key: &str, value: String, front: bool) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.write()?;
        Self::evict_if_expired(&mut entries, key, now);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::persistent(Value::List(VecDeque::new())));

        match &mut entry.value {
            Value::List(list) => {
                if front {
                    list.push_front(value);
                } else {
                    list.push_back(value);
                }
                Ok(list.len())
            }
            _ => Err(MatchmakingError::StoreTypeMismatch {
                key: key.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl EphemeralStore for InMemoryEphemeralStore {
    async fn rpush(&self, key: &str, value: String) -> Result<usize> {
        self.push(key, value, false)
    }

    async fn lpush(&self, key: &str, value: String) -> Result<usize> {
        self.push(key, value, true)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.write()?;
        Self::evict_if_expired(&mut entries, key, now);

        let (popped, now_empty) = match entries.get_mut(key) {
            None => return Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let popped = list.pop_front();
                (popped, list.is_empty())
            }
            Some(_) => {
                return Err(MatchmakingError::StoreTypeMismatch {
                    key: key.to_string(),
                }
                .into())
            }
        };

        // Empty lists cease to exist
        if now_empty {
            entries.remove(key);
        }

        Ok(popped)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let now = Instant::now();
        let entries = self.read()?;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => Ok(0),
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len()),
            Some(_) => Err(MatchmakingError::StoreTypeMismatch {
                key: key.to_string(),
            }
            .into()),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.write()?;
        Self::evict_if_expired(&mut entries, key, now);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::persistent(Value::Set(BTreeSet::new())));

        match &mut entry.value {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(MatchmakingError::StoreTypeMismatch {
                key: key.to_string(),
            }
            .into()),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.read()?;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => Ok(Vec::new()),
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(MatchmakingError::StoreTypeMismatch {
                key: key.to_string(),
            }
            .into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.read()?;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => Ok(None),
            None => Ok(None),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(MatchmakingError::StoreTypeMismatch {
                key: key.to_string(),
            }
            .into()),
        }
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        let mut entries = self.write()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.write()?;
        Self::evict_if_expired(&mut entries, key, now);

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let entries = self.read()?;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_fifo() {
        let store = InMemoryEphemeralStore::new();
        store.rpush("q", "a".to_string()).await.unwrap();
        store.rpush("q", "b".to_string()).await.unwrap();
        assert_eq!(store.llen("q").await.unwrap(), 2);

        assert_eq!(store.lpop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.lpop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.lpop("q").await.unwrap(), None);
        assert_eq!(store.llen("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lpush_returns_entry_to_front() {
        let store = InMemoryEphemeralStore::new();
        store.rpush("q", "b".to_string()).await.unwrap();
        store.lpush("q", "a".to_string()).await.unwrap();
        assert_eq!(store.lpop("q").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_set_add_is_idempotent() {
        let store = InMemoryEphemeralStore::new();
        assert!(store.sadd("s", "x").await.unwrap());
        assert!(!store.sadd("s", "x").await.unwrap());
        assert!(store.sadd("s", "y").await.unwrap());
        assert_eq!(store.smembers("s").await.unwrap(), vec!["x", "y"]);
        assert!(store.smembers("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = InMemoryEphemeralStore::new();
        store.sadd("s", "x").await.unwrap();
        let err = store.lpop("s").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::StoreTypeMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_expire() {
        let store = InMemoryEphemeralStore::new();
        store
            .set_ex("k", "v".to_string(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_refreshes_lifetime() {
        let store = InMemoryEphemeralStore::new();
        store.sadd("s", "x").await.unwrap();
        assert_eq!(store.ttl("s").await.unwrap(), None);

        assert!(store.expire("s", Duration::from_secs(10)).await.unwrap());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.expire("s", Duration::from_secs(10)).await.unwrap());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.smembers("s").await.unwrap(), vec!["x"]);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.smembers("s").await.unwrap().is_empty());
        assert!(!store.expire("s", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryEphemeralStore::new();
        store
            .set_ex("a", "1".to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        store
            .set_ex("b", "2".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        store.rpush("q", "x".to_string()).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.key_count().unwrap(), 2);
    }
}
