//! Abstract key-value cache shared by every request-handling thread.
//!
//! Rate-limit counters and CSRF bindings live here. Each `get`/`put`/`remove`
//! is expected to be atomic per key; nothing more is assumed. In particular
//! callers must not rely on in-process memory semantics, since production
//! deployments back this with a shared store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),

    #[error("cached value could not be decoded: {0}")]
    Decode(String),
}

/// Namespaced key-value cache with optional per-entry TTL.
///
/// `namespace` is the tenant (app id) so that one tenant's keys can never
/// collide with another's.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError>;
    fn put(&self, namespace: &str, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;
    fn remove(&self, namespace: &str, key: &str) -> Result<(), CacheError>;
}

impl<S> KeyValueCache for Arc<S>
where
    S: KeyValueCache + ?Sized,
{
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(namespace, key)
    }

    fn put(&self, namespace: &str, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        (**self).put(namespace, key, value, ttl)
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        (**self).remove(namespace, key)
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory cache for tests/dev and single-node deployments.
///
/// Expired entries are dropped lazily on read.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    inner: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        match self.inner.read() {
            Ok(map) => map.values().filter(|e| !e.is_expired(now)).count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> CacheError {
        CacheError::Backend("in-memory cache lock poisoned".to_string())
    }
}

impl KeyValueCache for InMemoryCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError> {
        let composite = (namespace.to_string(), key.to_string());
        let now = Instant::now();
        {
            let map = self.inner.read().map_err(|_| Self::poisoned())?;
            match map.get(&composite) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        if map.get(&composite).is_some_and(|e| e.is_expired(now)) {
            map.remove(&composite);
        }
        Ok(None)
    }

    fn put(&self, namespace: &str, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        map.insert((namespace.to_string(), key.to_string()), entry);
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        let mut map = self.inner.write().map_err(|_| Self::poisoned())?;
        map.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}
