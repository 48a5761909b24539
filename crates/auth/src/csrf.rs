//! CSRF secrets bound to an identity, kept in the shared cache.

use std::sync::Arc;
use std::time::Duration;

use subtle::ConstantTimeEq;

use tollgate_core::{CacheError, KeyValueCache};

use crate::identity::generate_secret;
use crate::{AuthConfig, Identity};

#[derive(Clone)]
pub struct CsrfStore {
    cache: Arc<dyn KeyValueCache>,
    ttl: Duration,
}

impl core::fmt::Debug for CsrfStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CsrfStore").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

fn csrf_key(identity: &Identity) -> String {
    format!("{}/csrf", identity.key())
}

impl CsrfStore {
    pub fn new(cache: Arc<dyn KeyValueCache>, config: &AuthConfig) -> Self {
        let ttl = Duration::from_secs(config.session_timeout_secs.max(0).unsigned_abs());
        Self { cache, ttl }
    }

    /// The identity's CSRF secret, created on first use.
    pub fn token_for(&self, identity: &Identity) -> Result<String, CacheError> {
        let tenant = identity.app().id.as_str();
        let key = csrf_key(identity);
        if let Some(existing) = self.cache.get(tenant, &key)? {
            return Ok(existing);
        }
        let token = generate_secret();
        self.cache.put(tenant, &key, token.clone(), Some(self.ttl))?;
        tracing::debug!(app_id = tenant, identity = %identity.key(), "issued csrf token");
        Ok(token)
    }

    /// Constant-time check of `candidate`. Missing bindings and cache
    /// failures are a mismatch.
    pub fn is_valid(&self, identity: &Identity, candidate: &str) -> bool {
        match self.cache.get(identity.app().id.as_str(), &csrf_key(identity)) {
            Ok(Some(stored)) => stored.as_bytes().ct_eq(candidate.as_bytes()).into(),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(identity = %identity.key(), error = %e, "csrf lookup failed");
                false
            }
        }
    }

    /// Carry the secret issued to a guest over to the identity they signed
    /// in as. No-op when the guest never had one.
    pub fn bind(&self, anonymous: &Identity, authenticated: &Identity) -> Result<(), CacheError> {
        let Some(token) = self.cache.get(anonymous.app().id.as_str(), &csrf_key(anonymous))? else {
            return Ok(());
        };
        self.cache.put(
            authenticated.app().id.as_str(),
            &csrf_key(authenticated),
            token,
            Some(self.ttl),
        )
    }
}
