//! Category-partitioned response cache with LRU eviction, per-entry TTL and
//! a per-category byte budget.
//!
//! Categories are independent shards: each holds its own lock, limits and
//! LRU order, so traffic in one category never contends with another.
//! Lookups never fail; a saturated insert quietly no-ops.

use lru::LruCache;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Closed set of cache partitions. Callers without a natural home use
/// [`CacheCategory::General`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    UserInfo,
    ChatInfo,
    DepartmentInfo,
    AppInfo,
    AppTokens,
    TableSchema,
    UserPermissions,
    General,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 8] = [
        CacheCategory::UserInfo,
        CacheCategory::ChatInfo,
        CacheCategory::DepartmentInfo,
        CacheCategory::AppInfo,
        CacheCategory::AppTokens,
        CacheCategory::TableSchema,
        CacheCategory::UserPermissions,
        CacheCategory::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::UserInfo => "userInfo",
            CacheCategory::ChatInfo => "chatInfo",
            CacheCategory::DepartmentInfo => "departmentInfo",
            CacheCategory::AppInfo => "appInfo",
            CacheCategory::AppTokens => "appTokens",
            CacheCategory::TableSchema => "tableSchema",
            CacheCategory::UserPermissions => "userPermissions",
            CacheCategory::General => "general",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        CacheCategory::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Built-in limits; tuned per category's churn and payload size.
    fn default_limits(self) -> CategoryLimits {
        match self {
            CacheCategory::UserInfo => CategoryLimits::new(Duration::from_secs(600), 500, 256 * 1024),
            CacheCategory::ChatInfo => CategoryLimits::new(Duration::from_secs(300), 500, 256 * 1024),
            CacheCategory::DepartmentInfo => {
                CategoryLimits::new(Duration::from_secs(1800), 200, 128 * 1024)
            }
            CacheCategory::AppInfo => CategoryLimits::new(Duration::from_secs(3600), 100, 128 * 1024),
            CacheCategory::AppTokens => CategoryLimits::new(Duration::from_secs(90 * 60), 50, 64 * 1024),
            CacheCategory::TableSchema => {
                CategoryLimits::new(Duration::from_secs(900), 200, 512 * 1024)
            }
            CacheCategory::UserPermissions => {
                CategoryLimits::new(Duration::from_secs(300), 500, 128 * 1024)
            }
            CacheCategory::General => CategoryLimits::new(Duration::from_secs(300), 1000, 1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CategoryLimits {
    pub ttl: Duration,
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl CategoryLimits {
    pub fn new(ttl: Duration, max_entries: usize, max_bytes: usize) -> Self {
        Self {
            ttl,
            max_entries,
            max_bytes,
        }
    }
}

struct CacheEntry {
    /// Original key, kept to tell hash collisions apart from real hits.
    key: String,
    value: Value,
    expires_at: Instant,
    hit_count: u64,
    size_bytes: usize,
}

struct CategoryShard {
    limits: CategoryLimits,
    entries: LruCache<String, CacheEntry>,
    total_bytes: usize,
}

impl CategoryShard {
    fn new(limits: CategoryLimits) -> Self {
        let cap = NonZeroUsize::new(limits.max_entries.max(1)).expect("max_entries floor is 1");
        Self {
            limits,
            entries: LruCache::new(cap),
            total_bytes: 0,
        }
    }

    fn drop_expired(&mut self, now: Instant) {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            if let Some(entry) = self.entries.pop(&key) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
            }
        }
    }

    fn evict_lru(&mut self) -> bool {
        if let Some((_, entry)) = self.entries.pop_lru() {
            self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
            true
        } else {
            false
        }
    }
}

/// Stable, non-cryptographic key hash (FNV-1a 64) rendered as a short bucket
/// name. The original key rides along in the entry so colliding probes read
/// as misses instead of wrong values.
fn hash_key(key: &str) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    format!("{:016x}", hash)
}

fn estimate_size(key: &str, value: &Value) -> usize {
    let body = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
    key.len() + body
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub category_entries: HashMap<&'static str, usize>,
    pub category_bytes: HashMap<&'static str, usize>,
}

/// One shard per category; hit/miss counters are process-wide atomics read
/// without coordination, so metrics are approximate by design.
pub struct CacheManager {
    shards: HashMap<CacheCategory, Mutex<CategoryShard>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    pub fn new(overrides: HashMap<CacheCategory, CategoryLimits>) -> Self {
        let shards = CacheCategory::ALL
            .into_iter()
            .map(|category| {
                let limits = overrides
                    .get(&category)
                    .copied()
                    .unwrap_or_else(|| category.default_limits());
                (category, Mutex::new(CategoryShard::new(limits)))
            })
            .collect();
        Self {
            shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard(&self, category: CacheCategory) -> std::sync::MutexGuard<'_, CategoryShard> {
        self.shards[&category]
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fresh-hit lookup. Expired entries are removed and reported as misses.
    pub fn get(&self, category: CacheCategory, key: &str) -> Option<Value> {
        let hashed = hash_key(key);
        let now = Instant::now();
        let mut shard = self.shard(category);

        let expired = match shard.entries.get_mut(&hashed) {
            Some(entry) if entry.key == key => {
                if entry.expires_at > now {
                    entry.hit_count += 1;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                true
            }
            _ => false,
        };

        if expired {
            if let Some(entry) = shard.entries.pop(&hashed) {
                shard.total_bytes = shard.total_bytes.saturating_sub(entry.size_bytes);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert under the category's limits, evicting expired entries first and
    /// then least-recently-used ones until both the entry and byte budgets
    /// hold. A value larger than the whole byte budget is not stored.
    pub fn set(&self, category: CacheCategory, key: &str, value: Value, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut shard = self.shard(category);
        let ttl = ttl.unwrap_or(shard.limits.ttl);
        let size_bytes = estimate_size(key, &value);

        if size_bytes > shard.limits.max_bytes {
            debug!(
                "cache: value for '{}' ({} bytes) exceeds {} budget, not cached",
                key,
                size_bytes,
                category.as_str()
            );
            return;
        }

        shard.drop_expired(now);

        let hashed = hash_key(key);
        if let Some(old) = shard.entries.pop(&hashed) {
            shard.total_bytes = shard.total_bytes.saturating_sub(old.size_bytes);
        }

        while shard.entries.len() >= shard.limits.max_entries {
            if !shard.evict_lru() {
                break;
            }
        }
        while shard.total_bytes + size_bytes > shard.limits.max_bytes {
            if !shard.evict_lru() {
                break;
            }
        }

        shard.total_bytes += size_bytes;
        shard.entries.put(
            hashed,
            CacheEntry {
                key: key.to_string(),
                value,
                expires_at: now + ttl,
                hit_count: 0,
                size_bytes,
            },
        );
    }

    /// Presence check without touching LRU order or hit counters.
    pub fn has(&self, category: CacheCategory, key: &str) -> bool {
        let hashed = hash_key(key);
        let now = Instant::now();
        let shard = self.shard(category);
        shard
            .entries
            .peek(&hashed)
            .is_some_and(|e| e.key == key && e.expires_at > now)
    }

    pub fn delete(&self, category: CacheCategory, key: &str) -> bool {
        let hashed = hash_key(key);
        let mut shard = self.shard(category);
        match shard.entries.pop(&hashed) {
            Some(entry) => {
                shard.total_bytes = shard.total_bytes.saturating_sub(entry.size_bytes);
                true
            }
            None => false,
        }
    }

    /// Remove everything in one category; returns the number of entries
    /// dropped.
    pub fn clear_category(&self, category: CacheCategory) -> usize {
        let mut shard = self.shard(category);
        let count = shard.entries.len();
        shard.entries.clear();
        shard.total_bytes = 0;
        count
    }

    pub fn clear(&self) {
        for category in CacheCategory::ALL {
            self.clear_category(category);
        }
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let mut category_entries = HashMap::new();
        let mut category_bytes = HashMap::new();
        for category in CacheCategory::ALL {
            let shard = self.shard(category);
            category_entries.insert(category.as_str(), shard.entries.len());
            category_bytes.insert(category.as_str(), shard.total_bytes);
        }
        CacheMetrics {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            category_entries,
            category_bytes,
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[cfg(test)]
mod tests;
