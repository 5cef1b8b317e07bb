//! Two-tier cache of per-scope aggregates.
//!
//! The memory tier is a bounded LRU map owned by the process; the durable tier
//! is whatever [`KeyValueStore`] the host injects. Reads fall through from
//! memory to durable storage, writes land in memory synchronously and reach
//! durable storage through detached background tasks.

pub mod clock;
pub mod key;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{storage_prefix, CacheKey};
pub use store::{KeyValueStore, MemoryStore};

use crate::config::CacheConfig;
use crate::core::scope::ScopeKey;
use crate::core::types::Aggregate;
use crate::error::{LexiconError, StoreError};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

const RECORD_VERSION: u32 = 1;

/// The JSON document stored under each durable key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRecord {
    word_state: Aggregate,
    timestamp: u64,
    #[serde(default = "record_version")]
    version: u32,
    #[serde(default)]
    url: String,
}

fn record_version() -> u32 {
    RECORD_VERSION
}

impl CacheRecord {
    fn decode(raw: &str) -> Result<Self, LexiconError> {
        let mut record: CacheRecord = serde_json::from_str(raw)?;
        record.word_state.normalize();
        Ok(record)
    }
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub memory_entries: usize,
    pub capacity: usize,
    pub ttl_millis: u64,
    /// Resident keys, most recently used first.
    pub resident: Vec<CacheKey>,
    pub evictions: u64,
    pub expirations: u64,
    pub pending_durable_ops: usize,
}

#[derive(Debug)]
enum DurableOp {
    Write(String),
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    generation: u64,
    removal: bool,
}

/// Bookkeeping shared with the detached durable tasks.
struct Background {
    permits: Semaphore,
    pending: Mutex<HashMap<String, Pending>>,
    // one lane per durable key: operations on a key never overlap
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_generation: AtomicU64,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Background {
    fn new(max_inflight: usize) -> Self {
        Self {
            permits: Semaphore::new(max_inflight.max(1)),
            pending: Mutex::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Registers a new operation for `key`, superseding any not yet started.
    fn claim(&self, key: &str, removal: bool) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.lock().insert(key.to_string(), Pending { generation, removal });
        generation
    }

    fn is_current(&self, key: &str, generation: u64) -> bool {
        self.pending.lock().get(key).is_some_and(|pending| pending.generation == generation)
    }

    fn release(&self, key: &str, generation: u64) {
        let mut pending = self.pending.lock();
        if pending.get(key).is_some_and(|p| p.generation == generation) {
            pending.remove(key);
        }
    }

    fn lane(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.lanes.lock().entry(key.to_string()).or_default())
    }

    /// Drops the key's lane once no other task holds it.
    fn retire_lane(&self, key: &str, lane: Arc<tokio::sync::Mutex<()>>) {
        let mut lanes = self.lanes.lock();
        // the map and `lane` are the only owners left
        if Arc::strong_count(&lane) == 2 {
            lanes.remove(key);
        }
    }

    fn removal_pending(&self, key: &str) -> bool {
        self.pending.lock().get(key).is_some_and(|pending| pending.removal)
    }

    /// Drops every queued operation whose key starts with `prefix`.
    fn supersede_prefix(&self, prefix: &str) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|key, _| !key.starts_with(prefix));
        before - pending.len()
    }

    fn finish(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

async fn bounded<T, F>(timeout_ms: u64, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout_ms)),
    }
}

/// Bounded two-tier cache of aggregates, namespaced per user.
///
/// No method returns an error: durable failures degrade to misses and dropped
/// writes, and the memory tier stays authoritative for the session.
pub struct LexicalCache {
    config: CacheConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    resident: Mutex<LruCache<CacheKey, Aggregate>>,
    background: Arc<Background>,
    runtime: Option<Handle>,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LexicalCache {
    /// Builds a cache over `store`. Must be called from within a tokio runtime
    /// for durable writes to run; otherwise the cache is memory-only.
    pub fn new(config: CacheConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(mut config: CacheConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or_else(|| {
            warn!("cache capacity 0 is not usable, clamping to 1");
            NonZeroUsize::MIN
        });
        config.capacity = capacity.get();

        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("no async runtime available, durable writes are disabled");
        }
        info!(capacity = config.capacity, ttl_millis = config.ttl_millis, "lexical cache initialized");

        Self {
            background: Arc::new(Background::new(config.max_inflight_writes)),
            resident: Mutex::new(LruCache::new(capacity)),
            config,
            store,
            clock,
            runtime,
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Looks up a user's aggregate for a scope: memory first, then the durable
    /// tier. Expired or unreadable durable entries are deleted and miss.
    pub async fn get(&self, scope: &ScopeKey, user_id: &str) -> Option<Aggregate> {
        if user_id.is_empty() {
            return None;
        }
        let key = CacheKey::new(user_id, scope.clone());

        let resident_hit = self.resident.lock().get(&key).cloned();
        if let Some(aggregate) = resident_hit {
            debug!(%key, "memory hit");
            return Some(aggregate);
        }

        let storage_key = key.storage_key();
        if self.background.removal_pending(&storage_key) {
            debug!(%key, "miss, durable removal pending");
            return None;
        }

        match self.load_durable(&storage_key).await {
            Ok(Some(record)) if !record.url.is_empty() && record.url != scope.as_str() => {
                warn!(%key, stored = %record.url, "durable record belongs to another scope, treating as miss");
                None
            }
            Ok(Some(record)) => {
                let age = self.clock.now_millis().saturating_sub(record.timestamp);
                if age > self.config.ttl_millis {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                    info!(%key, age, "durable entry expired");
                    self.remove_durable(&storage_key).await;
                    return None;
                }
                debug!(%key, "durable hit, promoting");
                self.insert_resident(key, record.word_state.clone());
                Some(record.word_state)
            }
            Ok(None) => {
                debug!(%key, "miss");
                None
            }
            Err(LexiconError::StateCorruption(e)) => {
                warn!(%key, error = %e, "discarding corrupt durable entry");
                self.remove_durable(&storage_key).await;
                None
            }
            Err(e) => {
                warn!(%key, error = %e, "durable read failed, treating as miss");
                None
            }
        }
    }

    /// Stores `aggregate` for the user's scope. The memory tier is updated
    /// before returning; the durable copy is written in the background.
    pub fn set(&self, scope: &ScopeKey, aggregate: Aggregate, user_id: &str) {
        if user_id.is_empty() {
            warn!(%scope, "refusing to cache state without a user id");
            return;
        }
        let key = CacheKey::new(user_id, scope.clone());
        let record = CacheRecord {
            word_state: aggregate,
            timestamp: self.clock.now_millis(),
            version: RECORD_VERSION,
            url: scope.to_string(),
        };
        let encoded = serde_json::to_string(&record);
        let storage_key = key.storage_key();

        self.insert_resident(key, record.word_state);

        match encoded {
            Ok(encoded) => self.schedule(storage_key, DurableOp::Write(encoded)),
            Err(e) => warn!(%scope, error = %e, "could not encode state, durable write dropped"),
        }
    }

    /// Removes every memory and durable entry belonging to `user_id`.
    /// Returns how many durable entries were deleted.
    pub async fn clear_for_user(&self, user_id: &str) -> usize {
        if user_id.is_empty() {
            return 0;
        }
        let resident_removed = {
            let mut resident = self.resident.lock();
            let doomed: Vec<CacheKey> = resident
                .iter()
                .filter(|(key, _)| key.user_id == user_id)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &doomed {
                resident.pop(key);
            }
            doomed.len()
        };

        let prefix = storage_prefix(user_id);
        let superseded = self.background.supersede_prefix(&prefix);
        // writes that already started must land before the listing below
        self.flush().await;

        let durable_removed = match bounded(self.config.store_timeout_ms, self.store.list_items(&prefix)).await {
            Ok(items) => {
                let mut removed = 0;
                for storage_key in items.keys() {
                    if self.remove_durable(storage_key).await {
                        removed += 1;
                    }
                }
                removed
            }
            Err(e) => {
                warn!(user_id, error = %e, "could not list durable entries for clear");
                0
            }
        };
        info!(user_id, resident_removed, durable_removed, superseded, "cleared user cache");
        durable_removed
    }

    /// Deletes the user's durable entries that are past their TTL or unreadable.
    pub async fn sweep_expired(&self, user_id: &str) -> usize {
        if user_id.is_empty() {
            return 0;
        }
        let prefix = storage_prefix(user_id);
        let items = match bounded(self.config.store_timeout_ms, self.store.list_items(&prefix)).await {
            Ok(items) => items,
            Err(e) => {
                warn!(user_id, error = %e, "could not list durable entries for sweep");
                return 0;
            }
        };

        let now = self.clock.now_millis();
        let mut cleared = 0;
        for (storage_key, raw) in &items {
            let stale = match CacheRecord::decode(raw) {
                Ok(record) => now.saturating_sub(record.timestamp) > self.config.ttl_millis,
                Err(_) => true,
            };
            if stale && self.remove_durable(storage_key).await {
                cleared += 1;
            }
        }
        if cleared > 0 {
            self.expirations.fetch_add(cleared as u64, Ordering::Relaxed);
            info!(user_id, cleared, "swept expired entries");
        }
        cleared
    }

    /// Waits until every scheduled durable operation has finished.
    pub async fn flush(&self) {
        loop {
            let idle = self.background.idle.notified();
            if self.background.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn stats(&self) -> CacheStats {
        let resident = self.resident.lock();
        CacheStats {
            memory_entries: resident.len(),
            capacity: self.config.capacity,
            ttl_millis: self.config.ttl_millis,
            resident: resident.iter().map(|(key, _)| key.clone()).collect(),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            pending_durable_ops: self.background.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Inserts into the memory tier, evicting the least recently used scope
    /// (and scheduling its durable deletion) when over capacity.
    fn insert_resident(&self, key: CacheKey, aggregate: Aggregate) {
        let evicted = {
            let mut resident = self.resident.lock();
            match resident.push(key.clone(), aggregate) {
                Some((old_key, _)) if old_key != key => Some(old_key),
                _ => None,
            }
        };
        if let Some(evicted) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            info!(key = %evicted, "evicted least recently used scope");
            self.schedule(evicted.storage_key(), DurableOp::Remove);
        }
    }

    async fn load_durable(&self, storage_key: &str) -> Result<Option<CacheRecord>, LexiconError> {
        let raw = bounded(self.config.store_timeout_ms, self.store.get_item(storage_key)).await?;
        raw.map(|raw| CacheRecord::decode(&raw)).transpose()
    }

    async fn remove_durable(&self, storage_key: &str) -> bool {
        match bounded(self.config.store_timeout_ms, self.store.remove_item(storage_key)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(storage_key, error = %e, "durable delete failed");
                false
            }
        }
    }

    /// Runs `op` against the durable tier on a detached task. Operations on
    /// one key run one at a time, and a queued operation is skipped if a newer
    /// one for the same key was scheduled.
    fn schedule(&self, storage_key: String, op: DurableOp) {
        let Some(runtime) = &self.runtime else {
            debug!(key = %storage_key, "no runtime, durable operation dropped");
            return;
        };

        let generation = self.background.claim(&storage_key, matches!(op, DurableOp::Remove));
        self.background.in_flight.fetch_add(1, Ordering::SeqCst);

        let background = Arc::clone(&self.background);
        let store = Arc::clone(&self.store);
        let timeout_ms = self.config.store_timeout_ms;

        runtime.spawn(async move {
            let lane = background.lane(&storage_key);
            {
                let _turn = lane.lock().await;
                // checked under the lane, so an older op can never land after a newer one
                if !background.is_current(&storage_key, generation) {
                    debug!(key = %storage_key, "superseded durable operation skipped");
                } else if let Ok(_permit) = background.permits.acquire().await {
                    let result = match op {
                        DurableOp::Write(encoded) => bounded(timeout_ms, store.set_item(&storage_key, encoded)).await,
                        DurableOp::Remove => bounded(timeout_ms, store.remove_item(&storage_key)).await,
                    };
                    match result {
                        Ok(()) => debug!(key = %storage_key, "durable operation applied"),
                        Err(e) => warn!(key = %storage_key, error = %e, "durable operation dropped"),
                    }
                    background.release(&storage_key, generation);
                }
            }
            background.retire_lane(&storage_key, lane);
            background.finish();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AggregateEntry;

    fn scope(key: &str) -> ScopeKey {
        ScopeKey::resolve(key).unwrap()
    }

    fn state(stem: &str, count: u64) -> Aggregate {
        [AggregateEntry::new(stem, stem, count)].into_iter().collect()
    }

    #[tokio::test]
    async fn set_then_get_hits_memory() {
        let store = Arc::new(MemoryStore::new());
        let cache = LexicalCache::new(CacheConfig::default(), store.clone());
        cache.set(&scope("a.com|/x"), state("book", 2), "u1");

        assert_eq!(cache.get(&scope("a.com|/x"), "u1").await, Some(state("book", 2)));
        cache.flush().await;
        assert!(store.contains("cache_u1_a.com__x"));
    }

    #[tokio::test]
    async fn record_layout_is_interoperable() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = LexicalCache::with_clock(CacheConfig::default(), store.clone(), clock);
        cache.set(&scope("a.com|/x"), state("book", 2), "u1");
        cache.flush().await;

        let raw = store.get_item("cache_u1_a.com__x").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
        assert_eq!(json["version"], 1);
        assert_eq!(json["url"], "a.com|/x");
        assert_eq!(json["wordState"]["book"]["count"], 2);
    }

    #[tokio::test]
    async fn stats_report_recency_order() {
        let cache = LexicalCache::new(CacheConfig::default().with_capacity(3), Arc::new(MemoryStore::new()));
        cache.set(&scope("a.com|/1"), state("a", 1), "u");
        cache.set(&scope("a.com|/2"), state("b", 1), "u");
        cache.get(&scope("a.com|/1"), "u").await;

        let stats = cache.stats();
        assert_eq!(stats.memory_entries, 2);
        assert_eq!(stats.capacity, 3);
        let order: Vec<&str> = stats.resident.iter().map(|key| key.scope.as_str()).collect();
        assert_eq!(order, vec!["a.com|/1", "a.com|/2"]);
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let cache = LexicalCache::new(CacheConfig::default().with_capacity(0), Arc::new(MemoryStore::new()));
        assert_eq!(cache.stats().capacity, 1);
    }

    #[test]
    fn without_runtime_the_cache_is_memory_only() {
        let store = Arc::new(MemoryStore::new());
        let cache = LexicalCache::new(CacheConfig::default(), store.clone());
        cache.set(&scope("a.com|/x"), state("book", 1), "u1");
        assert_eq!(cache.stats().memory_entries, 1);
        assert!(store.is_empty());
    }
}
