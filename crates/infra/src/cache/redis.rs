//! Redis-backed `KeyValueCache` (optional, `redis` feature).
//!
//! Keys are laid out as `<prefix><namespace>:<key>`. TTLs map to `SET EX`
//! with a one-second floor.

use std::time::Duration;

use ::redis::Commands;

use tollgate_core::{CacheError, KeyValueCache};

pub const DEFAULT_PREFIX: &str = "tollgate:";

#[derive(Debug, Clone)]
pub struct RedisCache {
    client: ::redis::Client,
    prefix: String,
}

impl RedisCache {
    pub fn open(redis_url: impl AsRef<str>) -> Result<Self, CacheError> {
        let client = ::redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        Ok(Self {
            client,
            prefix: DEFAULT_PREFIX.to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, namespace: &str, key: &str) -> String {
        format!("{}{namespace}:{key}", self.prefix)
    }

    fn connection(&self) -> Result<::redis::Connection, CacheError> {
        self.client.get_connection().map_err(backend)
    }
}

fn backend(e: ::redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

impl KeyValueCache for RedisCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection()?;
        conn.get(self.key(namespace, key)).map_err(backend)
    }

    fn put(&self, namespace: &str, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let full_key = self.key(namespace, key);
        match ttl {
            Some(ttl) => conn.set_ex(full_key, value, ttl.as_secs().max(1)).map_err(backend),
            None => conn.set(full_key, value).map_err(backend),
        }
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let _: i64 = conn.del(self.key(namespace, key)).map_err(backend)?;
        Ok(())
    }
}
