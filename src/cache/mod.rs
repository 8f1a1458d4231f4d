//! Label cache module - in-process cache of resolved label ids
//!
//! Sits in front of the persisted label mappings so repeated rule actions
//! against the same symbolic label skip the store and the provider:
//! - Keyed by (owner, symbolic name), ignoring the name's letter case
//! - TTL expiration so labels deleted remotely are eventually re-resolved
//! - Thread-safe async operations

use crate::db::LabelMapping;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Label cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelCacheConfig {
    /// Maximum number of mappings to cache
    pub max_capacity: u64,

    /// Time-to-live for cached mappings (in seconds)
    pub ttl_secs: u64,
}

impl Default for LabelCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1_000,
            ttl_secs: 3600,
        }
    }
}

type LabelKey = (String, String);

/// Cache of symbolic label name -> stored mapping, per owner
#[derive(Clone)]
pub struct LabelCache {
    cache: Arc<Cache<LabelKey, LabelMapping>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl LabelCache {
    /// Create a new label cache with default configuration
    pub fn new() -> Self {
        Self::with_config(LabelCacheConfig::default())
    }

    pub fn with_config(config: LabelCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();

        Self {
            cache: Arc::new(cache),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    fn key(owner: &str, name: &str) -> LabelKey {
        (owner.to_string(), name.to_ascii_lowercase())
    }

    /// Look up a cached mapping
    pub async fn get(&self, owner: &str, name: &str) -> Option<LabelMapping> {
        match self.cache.get(&Self::key(owner, name)).await {
            Some(mapping) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(mapping)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn insert(&self, mapping: LabelMapping) {
        self.cache.insert(Self::key(&mapping.owner, &mapping.name), mapping).await;
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            (hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            total_requests,
            hit_rate,
            entry_count: self.cache.entry_count(),
        }
    }
}

impl Default for LabelCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// Hit rate (percentage)
    pub hit_rate: f64,
    pub entry_count: u64,
}
