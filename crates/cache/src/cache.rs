use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use libris_kernel::settings::CacheSettings;
use libris_kernel::{Deadline, DeadlineExceeded, SharedClock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::backend::CacheBackend;
use crate::error::CacheError;

/// Counters reported by [`Cache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub backend_errors: u64,
    /// Entries currently held by the backend, 0 when it cannot be reached.
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Invalidation counters. A compute that sees its snapshot move does not
/// store its result.
#[derive(Debug, Default)]
struct Epochs {
    /// Bumped by invalidations not confined to one resource.
    global: AtomicU64,
    per_resource: DashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EpochSnapshot {
    global: u64,
    resource: u64,
}

impl Epochs {
    fn snapshot(&self, key: &str) -> EpochSnapshot {
        EpochSnapshot {
            global: self.global.load(Ordering::Acquire),
            resource: self
                .per_resource
                .get(resource_of(key))
                .map_or(0, |epoch| *epoch),
        }
    }

    /// Bump the epoch of the one resource `prefix` lies in, or the global
    /// epoch when the prefix spans resources.
    fn bump_for_prefix(&self, prefix: &str) {
        match prefix.split_once(':') {
            Some((resource, _)) => self.bump_resource(resource),
            None => {
                self.global.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    fn bump_resource(&self, resource: &str) {
        *self.per_resource.entry(resource.to_string()).or_insert(0) += 1;
    }
}

/// `books` for `books:list:page=2`.
fn resource_of(key: &str) -> &str {
    key.split_once(':').map_or(key, |(resource, _)| resource)
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    backend_errors: AtomicU64,
}

/// Read-through cache over a [`CacheBackend`].
///
/// Constructed once at startup and shared behind an `Arc`.
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    clock: SharedClock,
    enabled: bool,
    default_ttl: Duration,
    /// One lock per key currently being computed.
    flights: DashMap<String, Arc<Mutex<()>>>,
    epochs: Epochs,
    counters: Counters,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: SharedClock, default_ttl: Duration) -> Self {
        Self {
            backend,
            clock,
            enabled: true,
            default_ttl,
            flights: DashMap::new(),
            epochs: Epochs::default(),
            counters: Counters::default(),
        }
    }

    pub fn from_settings(
        settings: &CacheSettings,
        backend: Arc<dyn CacheBackend>,
        clock: SharedClock,
    ) -> Self {
        let mut cache = Self::new(backend, clock, Duration::from_secs(settings.default_ttl_secs));
        cache.enabled = settings.enabled;
        cache
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached value for `key`, or run `compute` and store what it
    /// produces for `ttl`.
    ///
    /// Concurrent misses on one key wait for a single computation and then
    /// read its stored result. Errors from `compute` are returned as-is and
    /// never cached. Backend failures are logged and the value is computed
    /// directly.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return compute().await;
        }

        match self.lookup::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(_) => return compute().await,
        }

        let flight = self
            .flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = flight.lock().await;

        // Another caller may have filled the key while we waited.
        let outcome = match self.lookup::<T>(key).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let epoch = self.epochs.snapshot(key);
                match compute().await {
                    Ok(value) => {
                        self.store(key, &value, ttl, epoch).await;
                        Ok(value)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(_) => compute().await,
        };

        drop(guard);
        // The map holds one handle and we hold another; anything more means
        // a caller is still queued on this flight.
        self.flights
            .remove_if(key, |_, lock| Arc::strong_count(lock) <= 2);
        outcome
    }

    /// [`get_or_compute`](Self::get_or_compute) bounded by `deadline`.
    ///
    /// Expiry abandons the lookup or computation; a caller queued behind it
    /// on the same key then computes in its place.
    pub async fn get_or_compute_within<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        deadline: Deadline,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<DeadlineExceeded>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        deadline.check()?;
        match deadline.run(self.get_or_compute(key, ttl, compute)).await {
            Ok(outcome) => outcome,
            Err(expired) => {
                tracing::debug!(key, "cache read abandoned at deadline");
                Err(expired.into())
            }
        }
    }

    /// Drop every entry whose key starts with `pattern`. A trailing `*` is
    /// accepted and ignored. Returns the number of entries removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        self.epochs.bump_for_prefix(prefix);
        match self.backend.delete_prefix(prefix).await {
            Ok(removed) => {
                tracing::debug!(prefix, removed, "cache prefix invalidated");
                removed
            }
            Err(err) => {
                self.backend_failed("invalidate_pattern", prefix, &err);
                0
            }
        }
    }

    /// Drop one entry. Returns whether it existed.
    pub async fn invalidate_key(&self, key: &str) -> bool {
        self.epochs.bump_resource(resource_of(key));
        match self.backend.delete(key).await {
            Ok(removed) => removed,
            Err(err) => {
                self.backend_failed("invalidate_key", key, &err);
                false
            }
        }
    }

    /// Remove entries whose ttl has run out.
    pub async fn purge_expired(&self) -> usize {
        match self.backend.purge_expired(self.clock.now()).await {
            Ok(purged) => purged,
            Err(err) => {
                self.backend_failed("purge_expired", "*", &err);
                0
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = match self.backend.len().await {
            Ok(len) => len as u64,
            Err(err) => {
                self.backend_failed("len", "*", &err);
                0
            }
        };
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            backend_errors: self.counters.backend_errors.load(Ordering::Relaxed),
            entries,
        }
    }

    /// `Ok(None)` on a miss, `Err` when the backend could not be read.
    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let payload = match self.backend.get(key, self.clock.now()).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.backend_failed("get", key, &err);
                return Err(err);
            }
        };

        match serde_json::from_slice(&payload) {
            Ok(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "evicting undecodable cache entry");
                if let Err(err) = self.backend.delete(key).await {
                    self.backend_failed("delete", key, &err);
                }
                Ok(None)
            }
        }
    }

    async fn store<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        epoch: EpochSnapshot,
    ) {
        if self.epochs.snapshot(key) != epoch {
            tracing::debug!(key, "cache invalidated during compute; result not stored");
            return;
        }

        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache value could not be encoded");
                return;
            }
        };

        if let Err(err) = self
            .backend
            .put(key, payload, self.clock.now(), ttl)
            .await
        {
            self.backend_failed("put", key, &err);
            return;
        }

        // An invalidation that landed between the check above and the put
        // would otherwise leave a stale entry behind.
        if self.epochs.snapshot(key) != epoch {
            if let Err(err) = self.backend.delete(key).await {
                self.backend_failed("delete", key, &err);
            }
        }
    }

    fn backend_failed(&self, op: &'static str, key: &str, err: &CacheError) {
        self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(op, key, error = %err, "cache backend failure; serving uncached");
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("enabled", &self.enabled)
            .field("default_ttl", &self.default_ttl)
            .field("in_flight", &self.flights.len())
            .finish_non_exhaustive()
    }
}
