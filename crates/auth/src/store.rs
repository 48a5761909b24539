//! Accessors for app and user records.
//!
//! Persistence is owned elsewhere; the core only needs lookups and one write
//! (persisting a rotated user token secret).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use tollgate_core::{AppId, Entity, UserId};

use crate::{App, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

pub trait AppStore: Send + Sync {
    fn find_app(&self, id: &AppId) -> Option<App>;
}

pub trait UserStore: Send + Sync {
    fn find_user(&self, app_id: &AppId, id: &UserId) -> Option<User>;
    fn find_by_identifier(&self, app_id: &AppId, identifier: &str) -> Option<User>;
    /// Persist the user; used after a token secret rotation.
    fn save_user(&self, user: &User) -> Result<(), StoreError>;
}

impl<S> AppStore for Arc<S>
where
    S: AppStore + ?Sized,
{
    fn find_app(&self, id: &AppId) -> Option<App> {
        (**self).find_app(id)
    }
}

impl<S> UserStore for Arc<S>
where
    S: UserStore + ?Sized,
{
    fn find_user(&self, app_id: &AppId, id: &UserId) -> Option<User> {
        (**self).find_user(app_id, id)
    }

    fn find_by_identifier(&self, app_id: &AppId, identifier: &str) -> Option<User> {
        (**self).find_by_identifier(app_id, identifier)
    }

    fn save_user(&self, user: &User) -> Result<(), StoreError> {
        (**self).save_user(user)
    }
}

/// How an entity is keyed in [`InMemoryStore`]. User ids are only unique
/// within their app, so users key by `(app, user)`.
pub trait StoreKey: Entity {
    type Key: Clone + Eq + Hash + core::fmt::Debug;

    fn store_key(&self) -> Self::Key;
}

impl StoreKey for App {
    type Key = AppId;

    fn store_key(&self) -> AppId {
        self.id().clone()
    }
}

impl StoreKey for User {
    type Key = (AppId, UserId);

    fn store_key(&self) -> Self::Key {
        (self.app_id.clone(), self.id().clone())
    }
}

/// In-memory entity store for tests/dev.
#[derive(Debug)]
pub struct InMemoryStore<E: StoreKey> {
    inner: RwLock<HashMap<E::Key, E>>,
}

impl<E: StoreKey> InMemoryStore<E> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert(&self, entity: E) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(entity.store_key(), entity);
        }
    }
}

impl<E: StoreKey> Default for InMemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryStore<E>
where
    E: StoreKey + Clone,
{
    fn get(&self, key: &E::Key) -> Option<E> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn find<P>(&self, predicate: P) -> Option<E>
    where
        P: Fn(&E) -> bool,
    {
        let map = self.inner.read().ok()?;
        map.values().find(|e| predicate(e)).cloned()
    }
}

impl AppStore for InMemoryStore<App> {
    fn find_app(&self, id: &AppId) -> Option<App> {
        self.get(id)
    }
}

impl UserStore for InMemoryStore<User> {
    fn find_user(&self, app_id: &AppId, id: &UserId) -> Option<User> {
        self.get(&(app_id.clone(), id.clone()))
    }

    fn find_by_identifier(&self, app_id: &AppId, identifier: &str) -> Option<User> {
        self.find(|u| &u.app_id == app_id && u.identifier == identifier)
    }

    fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::Backend("user store lock poisoned".to_string()))?;
        map.insert(user.store_key(), user.clone());
        Ok(())
    }
}
