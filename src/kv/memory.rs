//! In-process backend
//!
//! Mirrors the Redis semantics the upload core relies on (lazy key expiry,
//! hash fields, scored members) behind a single mutex. Expiry is measured
//! with `tokio::time::Instant`, so tests can drive it with a paused clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{KeyTtl, KvError, KvStore};

/// In-memory store, cheap to clone
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Entry>,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    String(String),
    Hash(HashMap<String, String>),
    SortedSet(HashMap<String, i64>),
}

impl MemoryInner {
    /// Drop the key if it has expired, then look it up
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, KvError> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Hash(map)) => Ok(map),
            _ => Err(wrong_type(key)),
        }
    }

    fn zset_mut(&mut self, key: &str) -> Result<&mut HashMap<String, i64>, KvError> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::SortedSet(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::SortedSet(set)) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }
}

fn wrong_type(key: &str) -> KvError {
    KvError::Command(format!(
        "WRONGTYPE operation against key '{}' holding the wrong kind of value",
        key
    ))
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: Value::String(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, KvError> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.live(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(Instant::now())),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let mut inner = self.inner.lock().await;
        inner
            .hash_mut(key)?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Hash(map)) => Ok(map.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), KvError> {
        let mut inner = self.inner.lock().await;
        inner.zset_mut(key)?.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let mut inner = self.inner.lock().await;
        match inner.live(key).map(|e| &mut e.value) {
            None => Ok(()),
            Some(Value::SortedSet(set)) => {
                set.remove(member);
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zpop_by_score(&self, key: &str, max_score: i64) -> Result<Vec<String>, KvError> {
        let mut inner = self.inner.lock().await;
        let set = match inner.live(key).map(|e| &mut e.value) {
            None => return Ok(Vec::new()),
            Some(Value::SortedSet(set)) => set,
            Some(_) => return Err(wrong_type(key)),
        };

        let mut due: Vec<(i64, String)> = set
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (*score, member.clone()))
            .collect();
        due.sort();

        for (_, member) in &due {
            set.remove(member);
        }

        Ok(due.into_iter().map(|(_, member)| member).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_expiry() {
        tokio::time::pause();
        let store = MemoryKvStore::new();

        store
            .set_ex("k", "v", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_hash_has_no_ttl_until_expire() {
        let store = MemoryKvStore::new();

        store.hset("h", "1", "b").await.unwrap();
        store.hset("h", "0", "a").await.unwrap();
        assert_eq!(store.ttl("h").await.unwrap(), KeyTtl::Persistent);

        assert!(store.expire("h", Duration::from_secs(60)).await.unwrap());
        assert!(matches!(store.ttl("h").await.unwrap(), KeyTtl::Expires(_)));

        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.hget("h", "0").await.unwrap(), Some("a".to_string()));
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_zpop_by_score_removes_due_range() {
        let store = MemoryKvStore::new();

        store.zadd("q", "c", 30).await.unwrap();
        store.zadd("q", "a", 10).await.unwrap();
        store.zadd("q", "b", 20).await.unwrap();
        // Re-adding re-scores instead of duplicating
        store.zadd("q", "a", 15).await.unwrap();

        let due = store.zpop_by_score("q", 20).await.unwrap();
        assert_eq!(due, vec!["a".to_string(), "b".to_string()]);

        let due = store.zpop_by_score("q", 20).await.unwrap();
        assert!(due.is_empty());

        store.zrem("q", "c").await.unwrap();
        assert!(store.zpop_by_score("q", i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryKvStore::new();
        store.hset("h", "f", "v").await.unwrap();
        assert!(store.get("h").await.is_err());
    }
}
