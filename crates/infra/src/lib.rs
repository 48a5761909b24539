//! Infrastructure layer: service wiring and cache backends.

pub mod cache;
pub mod context;

pub use context::{cache_from_url, ServiceContext, CACHE_URL_ENV};
