//! In-memory TTL cache with capacity eviction and per-key request coalescing

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheStats, CacheStore};

/// Longest lifetime an entry can get; larger TTLs are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

type Gates = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Removes a key's gate when its last user goes away, including on cancellation
struct GateGuard<'a> {
    gates: &'a Gates,
    key: &'a str,
    gate: Arc<Mutex<()>>,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut gates = self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map and this guard are the only holders
        if gates
            .get(self.key)
            .is_some_and(|g| Arc::ptr_eq(g, &self.gate) && Arc::strong_count(g) == 2)
        {
            gates.remove(self.key);
        }
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Logical clock of the last insert or hit
    touched: u64,
}

/// Internal state protected by mutex
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    clock: u64,
    stats: CacheStats,
}

impl<V: Clone> CacheInner<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Drop expired entries, then least recently touched ones, until within capacity
    fn evict(&mut self, capacity: usize, now: Instant) {
        if self.entries.len() <= capacity {
            return;
        }

        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let expired = before - self.entries.len();

        let mut evicted = 0;
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.touched)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }

        self.stats.evictions += (expired + evicted) as u64;
        debug!(expired, evicted, remaining = self.entries.len(), "CacheInner::evict: done");
    }
}

/// Keyed cache whose entries expire independently
///
/// `get` after an entry's expiry is a miss. When an insert pushes the cache past capacity,
/// expired entries go first, then the least recently used.
pub struct TtlCache<V> {
    name: String,
    capacity: usize,
    inner: Mutex<CacheInner<V>>,
    /// One gate per key currently being computed
    gates: Gates,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let name = name.into();
        debug!(%name, capacity, "TtlCache::new: called");
        Self {
            name,
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                clock: 0,
                stats: CacheStats::default(),
            }),
            gates: StdMutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Value for `key` if present and not expired
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let tick = inner.tick();

        let live = inner.entries.get(key).map(|e| now < e.expires_at);
        let fresh = match live {
            Some(true) => inner.entries.get_mut(key).map(|entry| {
                entry.touched = tick;
                entry.value.clone()
            }),
            Some(false) => {
                debug!(cache = %self.name, %key, "TtlCache::get: expired");
                inner.entries.remove(key);
                None
            }
            None => None,
        };

        if fresh.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        fresh
    }

    /// Store `value` under `key` for `ttl`, at most `MAX_TTL`
    pub async fn set(&self, key: &str, value: V, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now);
        let mut inner = self.inner.lock().await;
        let touched = inner.tick();
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                touched,
            },
        );
        inner.evict(self.capacity, now);
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().await.entries.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    /// Entries currently stored, including expired ones not yet evicted
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats.clone()
    }

    /// Cached value, or compute, store and return it
    ///
    /// Concurrent callers for the same missing key wait on one computation.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let result: Result<V, std::convert::Infallible> = self
            .try_get_or_compute(key, ttl, || async move { Ok(compute().await) })
            .await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like `get_or_compute`, but errors are returned and never cached
    pub async fn try_get_or_compute<E, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            debug!(cache = %self.name, %key, "TtlCache::try_get_or_compute: hit");
            return Ok(value);
        }

        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            gates.entry(key.to_string()).or_default().clone()
        };
        let gate = GateGuard {
            gates: &self.gates,
            key,
            gate,
        };
        let _held = gate.gate.clone().lock_owned().await;

        // Another caller may have filled the key while we waited
        let result = match self.peek(key).await {
            Some(value) => {
                debug!(cache = %self.name, %key, "TtlCache::try_get_or_compute: filled while waiting");
                Ok(value)
            }
            None => {
                debug!(cache = %self.name, %key, "TtlCache::try_get_or_compute: computing");
                let computed = compute().await;
                if let Ok(value) = &computed {
                    self.set(key, value.clone(), ttl).await;
                }
                computed
            }
        };
        result
    }

    /// Fresh value without touching hit/miss counters
    async fn peek(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(key)
            .filter(|e| now < e.expires_at)
            .map(|e| e.value.clone())
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> CacheStore<V> for TtlCache<V> {
    async fn get(&self, key: &str) -> Option<V> {
        TtlCache::get(self, key).await
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) {
        TtlCache::set(self, key, value, ttl).await
    }
}
