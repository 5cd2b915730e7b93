//! Keyed TTL caching for expensive external lookups

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

mod ttl;

pub use ttl::TtlCache;

/// Cache collaborator interface used by tools and the pipeline
#[async_trait]
pub trait CacheStore<V>: Send + Sync {
    async fn get(&self, key: &str) -> Option<V>;

    async fn set(&self, key: &str, value: V, ttl: Duration);
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}
