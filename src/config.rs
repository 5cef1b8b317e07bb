// src/config.rs
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const CONFIG_ENV: &str = "LEXICON_CONFIG";
const APP_DIR: &str = "reading-lexicon";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path();
        match config_path {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(AppConfig::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let parsed: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse TOML from {}", path.display()))?;
        Ok(parsed)
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|base| base.join(APP_DIR).join("config.toml"))
}

/// Sizing and ageing of the two-tier cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of scopes resident in the memory tier.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Maximum age of a durable entry before it is treated as a miss.
    #[serde(default = "default_ttl_millis")]
    pub ttl_millis: u64,
    /// Durable operations allowed to run at once; the rest queue.
    #[serde(default = "default_max_inflight_writes")]
    pub max_inflight_writes: usize,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_millis: default_ttl_millis(),
            max_inflight_writes: default_max_inflight_writes(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ttl_millis(mut self, ttl_millis: u64) -> Self {
        self.ttl_millis = ttl_millis;
        self
    }
}

fn default_capacity() -> usize {
    20
}

fn default_ttl_millis() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_max_inflight_writes() -> usize {
    8
}

fn default_store_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// File backing the durable tier. `None` keeps everything in memory.
    #[serde(default = "default_store_path")]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

fn default_store_path() -> Option<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .map(|base| base.join(APP_DIR).join("lexicon_store.bin"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity, 20);
        assert_eq!(config.ttl_millis, 86_400_000);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let parsed: AppConfig = toml::from_str("[cache]\ncapacity = 5\n").unwrap();
        assert_eq!(parsed.cache.capacity, 5);
        assert_eq!(parsed.cache.ttl_millis, 86_400_000);
        assert_eq!(parsed.cache.max_inflight_writes, 8);
    }

    #[test]
    fn explicit_store_path_is_used() {
        let parsed: AppConfig = toml::from_str("[store]\npath = \"/tmp/lexicon.bin\"\n").unwrap();
        assert_eq!(parsed.store.path, Some(PathBuf::from("/tmp/lexicon.bin")));
    }
}
