// src/error.rs
use thiserror::Error;

/// Failures of the durable key-value collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("durable store snapshot could not be encoded: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("durable store did not answer within {0} ms")]
    Timeout(u64),
    #[error("durable store unavailable: {0}")]
    Unavailable(String),
}

/// Everything that can go wrong inside the lexical cache. None of these reach
/// callers of the cache or engine: they are logged and degraded at the boundary.
#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("cannot derive a scope key from {location:?}: {reason}")]
    MalformedScope { location: String, reason: String },
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    #[error("cached state is corrupt: {0}")]
    StateCorruption(#[from] serde_json::Error),
}
