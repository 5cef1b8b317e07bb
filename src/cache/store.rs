// src/cache/store.rs
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// The durable key-value contract supplied by the host platform. Values are
/// opaque serialized records; the cache never depends on how they are stored.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_item(&self, key: &str, value: String) -> Result<(), StoreError>;

    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// All items whose key starts with `prefix`.
    async fn list_items(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.items.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.items.lock().remove(key);
        Ok(())
    }

    async fn list_items(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(prefixed(&self.items.lock(), prefix))
    }
}

pub(crate) fn prefixed(items: &BTreeMap<String, String>, prefix: &str) -> BTreeMap<String, String> {
    items
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
