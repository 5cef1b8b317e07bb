// File: src/session.rs
use crate::cache::LexicalCache;
use crate::core::scope::ScopeKey;
use crate::core::types::{Aggregate, Observation, ObservationBatch};
use crate::learning::{FrequencyAggregator, WordFlag};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The owning context of one page's vocabulary for one user: a tab, or one
/// route of a single-page application.
///
/// All mutations go through `&mut self`, so a session's aggregate is changed
/// by one caller at a time. Every mutation snapshots the aggregate into the
/// cache, so tearing the session down never loses state.
pub struct ScopeSession {
    user_id: String,
    scope: ScopeKey,
    aggregate: Aggregate,
    aggregator: FrequencyAggregator,
    cache: Arc<LexicalCache>,
}

impl ScopeSession {
    /// Opens a session, restoring the scope's last snapshot if the cache has one.
    pub async fn open(cache: Arc<LexicalCache>, user_id: impl Into<String>, scope: ScopeKey) -> Self {
        let user_id = user_id.into();
        let aggregate = cache.get(&scope, &user_id).await.unwrap_or_default();
        info!(%scope, user_id = %user_id, restored = aggregate.len(), "opened scope session");
        Self {
            user_id,
            scope,
            aggregate,
            aggregator: FrequencyAggregator::new(),
            cache,
        }
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// One highlighting pass worth of `surface form -> count`.
    pub fn on_words_observed(&mut self, batch: &ObservationBatch) -> &Aggregate {
        if self.aggregator.merge(&mut self.aggregate, batch) > 0 {
            self.snapshot();
        }
        &self.aggregate
    }

    /// Scanner output that already carries variants and dictionary data.
    pub fn on_observations(&mut self, observations: &BTreeMap<String, Observation>) -> &Aggregate {
        if self.aggregator.merge_observations(&mut self.aggregate, observations) > 0 {
            self.snapshot();
        }
        &self.aggregate
    }

    /// Occurrences that disappeared from the page, one per listed stem.
    pub fn on_words_withdrawn<S: AsRef<str>>(&mut self, stems: &[S]) -> &Aggregate {
        if self.aggregator.remove(&mut self.aggregate, stems).changed() {
            self.snapshot();
        }
        &self.aggregate
    }

    pub fn mark<S: AsRef<str>>(&mut self, stems: &[S], flag: WordFlag) -> &Aggregate {
        if self.aggregator.mark(&mut self.aggregate, stems, flag) > 0 {
            self.snapshot();
        }
        &self.aggregate
    }

    /// Moves the session to another scope, as on single-page navigation. The
    /// current state is saved first; navigating to the same scope is a no-op.
    pub async fn navigate(&mut self, scope: ScopeKey) {
        if scope == self.scope {
            return;
        }
        if !self.aggregate.is_empty() {
            self.snapshot();
        }
        debug!(from = %self.scope, to = %scope, "scope navigation");
        self.aggregate = self.cache.get(&scope, &self.user_id).await.unwrap_or_default();
        self.scope = scope;
    }

    /// Final snapshot on teardown. The durable write runs to completion on its
    /// own even though the session is gone.
    pub fn close(self) -> Aggregate {
        if !self.aggregate.is_empty() {
            self.snapshot();
        }
        info!(scope = %self.scope, user_id = %self.user_id, "closed scope session");
        self.aggregate
    }

    fn snapshot(&self) {
        self.cache.set(&self.scope, self.aggregate.clone(), &self.user_id);
    }
}
