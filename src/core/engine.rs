use crate::cache::{CacheKey, CacheStats, LexicalCache};
use crate::core::scope::ScopeKey;
use crate::core::types::{Aggregate, Observation, ObservationBatch};
use crate::learning::WordFlag;
use crate::session::ScopeSession;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};

type SharedSession = Arc<tokio::sync::Mutex<Option<ScopeSession>>>;

// The engine is the explicitly owned entry point: hosts construct one, inject
// it wherever scopes live, and pass user and location on every call.
// Open sessions are bounded by the cache capacity, least recently used first out.
pub struct LexiconEngine {
    cache: Arc<LexicalCache>,
    sessions: Mutex<LruCache<CacheKey, SharedSession>>,
}

impl LexiconEngine {
    pub fn new(cache: Arc<LexicalCache>) -> Self {
        let capacity = NonZeroUsize::new(cache.config().capacity).unwrap_or(NonZeroUsize::MIN);
        Self { cache, sessions: Mutex::new(LruCache::new(capacity)) }
    }

    /// Number of scopes with a live session.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn cache(&self) -> &Arc<LexicalCache> {
        &self.cache
    }

    /// Merges a scanner batch into the location's aggregate and returns the
    /// updated state. A location that yields no scope key leaves nothing behind.
    pub async fn on_words_observed(&self, location: &str, user_id: &str, batch: &ObservationBatch) -> Aggregate {
        self.with_session(location, user_id, |session| session.on_words_observed(batch).clone())
            .await
            .unwrap_or_default()
    }

    pub async fn on_observations(
        &self,
        location: &str,
        user_id: &str,
        observations: &BTreeMap<String, Observation>,
    ) -> Aggregate {
        self.with_session(location, user_id, |session| session.on_observations(observations).clone())
            .await
            .unwrap_or_default()
    }

    pub async fn on_words_withdrawn<S: AsRef<str>>(&self, location: &str, user_id: &str, stems: &[S]) -> Aggregate {
        self.with_session(location, user_id, |session| session.on_words_withdrawn(stems).clone())
            .await
            .unwrap_or_default()
    }

    pub async fn mark<S: AsRef<str>>(&self, location: &str, user_id: &str, stems: &[S], flag: WordFlag) -> Aggregate {
        self.with_session(location, user_id, |session| session.mark(stems, flag).clone())
            .await
            .unwrap_or_default()
    }

    /// Current word/frequency state for rendering. Empty when nothing is known
    /// about the location.
    pub async fn query(&self, location: &str, user_id: &str) -> Aggregate {
        let Some(scope) = resolve(location) else {
            return Aggregate::new();
        };
        let open = self.sessions.lock().get(&CacheKey::new(user_id, scope.clone())).cloned();
        if let Some(shared) = open {
            if let Some(session) = shared.lock().await.as_ref() {
                return session.aggregate().clone();
            }
        }
        self.cache.get(&scope, user_id).await.unwrap_or_default()
    }

    /// Tears down the location's session after a final snapshot.
    pub async fn close_scope(&self, location: &str, user_id: &str) -> Aggregate {
        let Some(scope) = resolve(location) else {
            return Aggregate::new();
        };
        let shared = self.sessions.lock().pop(&CacheKey::new(user_id, scope));
        match shared {
            Some(shared) => shared.lock().await.take().map(ScopeSession::close).unwrap_or_default(),
            None => Aggregate::new(),
        }
    }

    /// Forgets everything held for `user_id`, open sessions included.
    pub async fn clear_user(&self, user_id: &str) -> usize {
        let closing: Vec<SharedSession> = {
            let mut sessions = self.sessions.lock();
            let keys: Vec<CacheKey> =
                sessions.iter().map(|(key, _)| key).filter(|key| key.user_id == user_id).cloned().collect();
            keys.iter().filter_map(|key| sessions.pop(key)).collect()
        };
        for shared in closing {
            // dropped without a final snapshot, the state is being cleared
            shared.lock().await.take();
        }
        self.cache.clear_for_user(user_id).await
    }

    pub async fn sweep_expired(&self, user_id: &str) -> usize {
        self.cache.sweep_expired(user_id).await
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Waits for outstanding durable writes; call before shutting down.
    pub async fn flush(&self) {
        self.cache.flush().await;
    }

    async fn with_session<T>(
        &self,
        location: &str,
        user_id: &str,
        apply: impl FnOnce(&mut ScopeSession) -> T,
    ) -> Option<T> {
        if user_id.is_empty() {
            warn!(location, "ignoring event without a user id");
            return None;
        }
        let scope = resolve(location)?;
        let key = CacheKey::new(user_id, scope.clone());
        let (shared, displaced) = {
            let mut sessions = self.sessions.lock();
            match sessions.get(&key) {
                Some(shared) => (Arc::clone(shared), None),
                None => {
                    let shared = SharedSession::default();
                    let displaced = sessions.push(key, Arc::clone(&shared));
                    (shared, displaced)
                }
            }
        };
        if let Some((displaced_key, displaced)) = displaced {
            // its state is already in the cache: every mutation snapshots
            displaced.lock().await.take();
            debug!(key = %displaced_key, "dropped least recently used session");
        }

        // held for the whole event, so one scope's events apply one at a time
        let mut slot = shared.lock().await;
        if slot.is_none() {
            *slot = Some(ScopeSession::open(Arc::clone(&self.cache), user_id, scope).await);
        }
        slot.as_mut().map(apply)
    }
}

fn resolve(location: &str) -> Option<ScopeKey> {
    match ScopeKey::resolve(location) {
        Ok(scope) => Some(scope),
        Err(e) => {
            warn!(error = %e, "no scope for location, returning empty state");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::config::CacheConfig;

    fn engine() -> LexiconEngine {
        LexiconEngine::new(Arc::new(LexicalCache::new(CacheConfig::default(), Arc::new(MemoryStore::new()))))
    }

    fn batch(pairs: &[(&str, u64)]) -> ObservationBatch {
        pairs.iter().map(|&(word, count)| (word.to_string(), count)).collect()
    }

    #[tokio::test]
    async fn malformed_location_yields_empty_state() {
        let engine = engine();
        let state = engine.on_words_observed("::not a location::", "u", &batch(&[("books", 1)])).await;
        assert!(state.is_empty());
        assert!(engine.query("::not a location::", "u").await.is_empty());
        assert_eq!(engine.stats().memory_entries, 0);
    }

    #[tokio::test]
    async fn events_for_one_location_accumulate() {
        let engine = engine();
        let page = "https://example.com/post";
        engine.on_words_observed(page, "u", &batch(&[("drop", 1), ("dropped", 2)])).await;
        engine.on_words_observed(page, "u", &batch(&[("dropping", 1)])).await;
        let state = engine.on_words_withdrawn(page, "u", &["drop"]).await;
        assert_eq!(state.get("drop").unwrap().total_count, 3);
        assert_eq!(engine.query("example.com|/post", "u").await, state);
    }

    #[tokio::test]
    async fn closed_scope_is_served_from_cache() {
        let engine = engine();
        let page = "https://example.com/post";
        engine.on_words_observed(page, "u", &batch(&[("books", 2)])).await;
        engine.mark(page, "u", &["book"], WordFlag::Library).await;
        let closed = engine.close_scope(page, "u").await;

        let queried = engine.query(page, "u").await;
        assert_eq!(queried, closed);
        assert!(queried.get("book").unwrap().is_library);
    }

    #[tokio::test]
    async fn open_sessions_are_bounded_by_cache_capacity() {
        let cache = Arc::new(LexicalCache::new(CacheConfig::default().with_capacity(2), Arc::new(MemoryStore::new())));
        let engine = LexiconEngine::new(cache);
        for page in ["https://a.com/1", "https://a.com/2", "https://a.com/3"] {
            engine.on_words_observed(page, "u", &batch(&[("books", 1)])).await;
        }
        assert_eq!(engine.open_sessions(), 2);

        // the newest session is kept and keeps accumulating
        let state = engine.on_words_observed("https://a.com/3", "u", &batch(&[("book", 1)])).await;
        assert_eq!(state.get("book").unwrap().total_count, 2);
        assert_eq!(engine.open_sessions(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_events_on_one_location_are_all_applied() {
        let engine = Arc::new(engine());
        let page = "https://example.com/feed";
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine.on_words_observed(page, "u", &batch(&[("dropped", 1), ("drop", 1)])).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let state = engine.query(page, "u").await;
        assert_eq!(state.get("drop").unwrap().total_count, 64);
        engine.flush().await;
        assert_eq!(engine.cache().get(&ScopeKey::resolve(page).unwrap(), "u").await, Some(state));
    }

    #[tokio::test]
    async fn clear_user_drops_sessions_and_cache() {
        let engine = engine();
        let page = "https://example.com/post";
        engine.on_words_observed(page, "u", &batch(&[("books", 2)])).await;
        engine.on_words_observed(page, "other", &batch(&[("books", 1)])).await;
        engine.clear_user("u").await;

        assert!(engine.query(page, "u").await.is_empty());
        assert_eq!(engine.query(page, "other").await.get("book").unwrap().total_count, 1);
    }
}
