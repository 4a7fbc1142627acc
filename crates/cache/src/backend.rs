use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::CacheResult;

/// Storage behind [`Cache`](crate::Cache).
///
/// Payloads are opaque serialized bytes written whole by `put`, so a reader
/// never observes a partial value. Expiry is evaluated against the `now`
/// the caller passes in.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Stored payload for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str, now: DateTime<Utc>) -> CacheResult<Option<Vec<u8>>>;

    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key starting with `prefix`; returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<usize>;

    /// Remove expired entries; returns how many went.
    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<usize>;

    async fn len(&self) -> CacheResult<usize>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    ttl: Duration,
}

impl StoredEntry {
    fn expired_at(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_at)
            .to_std()
            .is_ok_and(|age| age >= self.ttl)
    }
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> CacheResult<Option<Vec<u8>>> {
        let hit = self.entries.get(key).map(|entry| {
            if entry.expired_at(now) {
                None
            } else {
                Some(entry.payload.clone())
            }
        });
        match hit {
            Some(Some(payload)) => Ok(Some(payload)),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.expired_at(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                payload,
                created_at,
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired_at(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn len(&self) -> CacheResult<usize> {
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.put("books:1", b"{}".to_vec(), now, TTL).await.unwrap();

        assert!(backend.get("books:1", now).await.unwrap().is_some());
        let later = now + chrono::Duration::seconds(60);
        assert!(backend.get("books:1", later).await.unwrap().is_none());
        assert_eq!(backend.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_matching_keys() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        for key in ["books:list", "books:detail:1", "authors:list"] {
            backend.put(key, vec![1], now, TTL).await.unwrap();
        }

        assert_eq!(backend.delete_prefix("books:").await.unwrap(), 2);
        assert!(backend.get("authors:list", now).await.unwrap().is_some());
        assert!(!backend.delete("books:list").await.unwrap());
    }

    #[tokio::test]
    async fn purge_expired_keeps_fresh_entries() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.put("old", vec![1], now - chrono::Duration::minutes(5), TTL).await.unwrap();
        backend.put("new", vec![1], now, TTL).await.unwrap();

        assert_eq!(backend.purge_expired(now).await.unwrap(), 1);
        assert_eq!(backend.len().await.unwrap(), 1);
    }
}
