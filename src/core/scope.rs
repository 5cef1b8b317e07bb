// src/core/scope.rs
use crate::error::LexiconError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const SEPARATOR: char = '|';

/// Identity of the page whose vocabulary is cached: `"<host>|<path>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Derives the key for a page location. A bare root with a query string
    /// maps to `/?` so search-style landing pages don't share the root's state.
    pub fn from_url(location: &str) -> Result<Self, LexiconError> {
        let url = Url::parse(location.trim()).map_err(|e| LexiconError::MalformedScope {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
        let host = url.host_str().filter(|host| !host.is_empty()).ok_or_else(|| {
            LexiconError::MalformedScope {
                location: location.to_string(),
                reason: "location has no host".to_string(),
            }
        })?;

        let path = match (url.path(), url.query()) {
            ("/", Some(_)) => "/?",
            (path, _) => path,
        };
        Ok(Self(format!("{host}{SEPARATOR}{path}")))
    }

    /// Accepts either a full URL or an already-formed `host|path` key.
    pub fn resolve(location: &str) -> Result<Self, LexiconError> {
        let location = location.trim();
        if location.contains("://") {
            return Self::from_url(location);
        }
        match location.split_once(SEPARATOR) {
            Some((host, path)) if !host.is_empty() && path.starts_with('/') => {
                Ok(Self(location.to_string()))
            }
            _ => Err(LexiconError::MalformedScope {
                location: location.to_string(),
                reason: "expected a URL or a host|path scope key".to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
