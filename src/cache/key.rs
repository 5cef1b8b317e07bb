// src/cache/key.rs
use crate::core::scope::ScopeKey;
use serde::Serialize;
use std::fmt;

const STORAGE_PREFIX: &str = "cache_";

/// Where one user's state for one scope lives. The memory tier and the
/// durable tier are both keyed by this, never by the scope alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    pub user_id: String,
    pub scope: ScopeKey,
}

impl CacheKey {
    pub fn new(user_id: impl Into<String>, scope: ScopeKey) -> Self {
        Self { user_id: user_id.into(), scope }
    }

    /// `cache_<user>_<scope>` with the host separator and every `/` in the
    /// scope written as `_`.
    ///
    /// `%` and `_` are percent-escaped in both parts, and a `|` inside the path
    /// becomes `%7C`, so the user part never contains `_` and no two
    /// (user, scope) pairs share a key.
    pub fn storage_key(&self) -> String {
        let mut key = storage_prefix(&self.user_id);
        let mut in_path = false;
        for c in self.scope.as_str().chars() {
            match c {
                '%' => key.push_str("%25"),
                '_' => key.push_str("%5F"),
                '|' if in_path => key.push_str("%7C"),
                '|' => {
                    in_path = true;
                    key.push('_');
                }
                '/' => key.push('_'),
                other => key.push(other),
            }
        }
        key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.scope)
    }
}

/// Prefix shared by every durable key of `user_id`, and by no other user's.
pub fn storage_prefix(user_id: &str) -> String {
    let mut prefix = String::with_capacity(STORAGE_PREFIX.len() + user_id.len() + 1);
    prefix.push_str(STORAGE_PREFIX);
    for c in user_id.chars() {
        match c {
            '%' => prefix.push_str("%25"),
            '_' => prefix.push_str("%5F"),
            other => prefix.push(other),
        }
    }
    prefix.push('_');
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str, scope: &str) -> CacheKey {
        CacheKey::new(user, ScopeKey::resolve(scope).unwrap())
    }

    #[test]
    fn plain_keys_keep_the_persisted_layout() {
        assert_eq!(key("user1", "twitter.com|/home").storage_key(), "cache_user1_twitter.com__home");
        assert_eq!(storage_prefix("user1"), "cache_user1_");
    }

    #[test]
    fn underscores_cannot_cross_user_boundaries() {
        let alice = storage_prefix("alice");
        let other = key("alice_bob", "example.com|/").storage_key();
        assert!(!other.starts_with(&alice));
        assert_eq!(other, "cache_alice%5Fbob_example.com__");
    }

    #[test]
    fn distinct_scopes_never_collide() {
        let slash = key("u", "example.com|/a/b").storage_key();
        let underscore = key("u", "example.com|/a_b").storage_key();
        assert_ne!(slash, underscore);
    }

    #[test]
    fn pipes_inside_the_path_are_escaped() {
        let pipe = CacheKey::new("u", ScopeKey::from_url("https://x.com/a|b").unwrap());
        let slash = CacheKey::new("u", ScopeKey::from_url("https://x.com/a/b").unwrap());
        assert_eq!(pipe.scope.as_str(), "x.com|/a|b");
        assert_eq!(pipe.storage_key(), "cache_u_x.com__a%7Cb");
        assert_eq!(slash.storage_key(), "cache_u_x.com__a_b");
    }
}
