//! `tollgate-core`: foundation types shared by the auth crates.
//!
//! This crate contains identifiers, the domain error model and the abstract
//! key-value cache. No crypto, no HTTP.

pub mod cache;
pub mod entity;
pub mod error;
pub mod id;

pub use cache::{CacheError, InMemoryCache, KeyValueCache};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AppId, UserId};
