//! Query result cache
//!
//! Results are keyed by scope, method, query and item type, so entries for
//! different projects never mix. [`MemoryCache`] is a bounded moka cache
//! where each entry expires after the TTL it was stored with.
//! [`NoOpCache`] never stores anything.

use async_trait::async_trait;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::QueryError;
use crate::item::{Item, QueryMethod};

/// Entries kept before least-recently-used ones are evicted
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: String,
    pub method: QueryMethod,
    pub query: String,
    pub item_type: String,
}

impl CacheKey {
    pub fn new(scope: &str, method: QueryMethod, query: &str, item_type: &str) -> Self {
        Self {
            scope: scope.to_string(),
            method,
            query: query.to_string(),
            item_type: item_type.to_string(),
        }
    }

    /// Key under which a single item is served to `get`
    pub fn for_item(item: &Item) -> Self {
        Self::new(
            &item.scope,
            QueryMethod::Get,
            &item.unique_attribute_value,
            &item.item_type,
        )
    }
}

/// What a cache entry holds
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResult {
    Items(Vec<Item>),
    /// A confirmed absence, with the error to hand back
    NotFound(QueryError),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn lookup(&self, key: &CacheKey) -> Option<CachedResult>;

    async fn store(&self, key: CacheKey, value: CachedResult, ttl: Duration);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedResult,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with; a re-store restarts it
struct PerEntryTtl;

impl Expiry<CacheKey, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        entry: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        entry: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}

/// In-process cache with per-entry TTL and a size bound
pub struct MemoryCache {
    entries: moka::future::Cache<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        let entries = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Counters plus the live entry count, after pending evictions have run
    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.entry_count(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.entry_count())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn lookup(&self, key: &CacheKey) -> Option<CachedResult> {
        let found = self.entries.get(key).await.map(|e| e.value);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    async fn store(&self, key: CacheKey, value: CachedResult, ttl: Duration) {
        self.entries.insert(key, CacheEntry { value, ttl }).await;
    }
}

/// Cache that stores nothing, for tests and `--ignore-cache` runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCache;

#[async_trait]
impl Cache for NoOpCache {
    async fn lookup(&self, _key: &CacheKey) -> Option<CachedResult> {
        None
    }

    async fn store(&self, _key: CacheKey, _value: CachedResult, _ttl: Duration) {}
}
