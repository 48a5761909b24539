//! `KeyValueCache` backends beyond the in-memory one in `tollgate-core`.

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisCache;
