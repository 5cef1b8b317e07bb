// File: src/persistence.rs
use crate::cache::store::{prefixed, KeyValueStore};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// The on-disk form of the whole durable tier.
#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
struct SerializableState {
    items: BTreeMap<String, String>,
}

/// Durable store backed by a single bincode file. Every mutation rewrites the
/// file through a temp file + rename, so a crash never leaves a torn snapshot.
pub struct FileStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
    // serialises snapshot writes so an older snapshot never replaces a newer one
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Opens the store at `path`, starting empty if the file doesn't exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let items = match load_from_disk(&path) {
            Ok(state) => state.items,
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        info!(path = %path.display(), entries = items.len(), "opened durable store");
        Ok(Self {
            path,
            items: Mutex::new(items),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        // snapshot taken under the write lock, so it is at least as new as any
        // snapshot written before us
        let state = SerializableState { items: self.items.lock().clone() };
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || save_to_disk(&state, &path))
            .await
            .map_err(|e| StoreError::Unavailable(format!("snapshot task failed: {e}")))?
    }
}

fn save_to_disk(state: &SerializableState, path: &Path) -> Result<(), StoreError> {
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir)?;

    let temp_file = NamedTempFile::new_in(parent_dir)?;
    {
        let mut writer = BufWriter::new(&temp_file);
        bincode::serialize_into(&mut writer, state)?;
        writer.flush()?;
    }

    temp_file.persist(path).map_err(|e| StoreError::Io(e.error))?;
    debug!(path = %path.display(), entries = state.items.len(), "durable snapshot written");
    Ok(())
}

fn load_from_disk(path: &Path) -> Result<SerializableState, StoreError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let state: SerializableState = bincode::deserialize_from(reader)?;
    Ok(state)
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.items.lock().insert(key.to_string(), value);
        self.persist().await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.items.lock().remove(key).is_some();
        if removed {
            self.persist().await
        } else {
            Ok(())
        }
    }

    async fn list_items(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(prefixed(&self.items.lock(), prefix))
    }
}
