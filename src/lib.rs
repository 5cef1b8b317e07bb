// src/lib.rs

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod learning;
pub mod persistence;
pub mod session;

pub use crate::cache::{CacheStats, KeyValueStore, LexicalCache, MemoryStore};
pub use crate::config::{AppConfig, CacheConfig};
pub use crate::core::engine::LexiconEngine;
pub use crate::core::scope::ScopeKey;
pub use crate::core::stemmer::Stemmer;
pub use crate::core::types::{Aggregate, AggregateEntry, ObservationBatch};
pub use crate::error::{LexiconError, StoreError};
pub use crate::learning::{FrequencyAggregator, WordFlag};
pub use crate::persistence::FileStore;
pub use crate::session::ScopeSession;
