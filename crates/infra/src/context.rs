//! Explicit service context, built once at startup and handed to whatever
//! serves requests. Every auth component is derived from it, so nothing
//! reaches for process-wide state.

use std::sync::Arc;

use anyhow::{bail, Context};

use tollgate_auth::{
    AppStore, AuthConfig, CsrfStore, PermissionEvaluator, ProtectedPath, RateLimiter, RequestAuthenticator,
    SessionService, Signer, TokenService, UserStore,
};
use tollgate_core::{InMemoryCache, KeyValueCache};

pub const CACHE_URL_ENV: &str = "TOLLGATE_CACHE_URL";

#[derive(Clone)]
pub struct ServiceContext {
    config: AuthConfig,
    cache: Arc<dyn KeyValueCache>,
    apps: Arc<dyn AppStore>,
    users: Arc<dyn UserStore>,
    protected_paths: Vec<ProtectedPath>,
}

impl core::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("config", &self.config)
            .field("protected_paths", &self.protected_paths)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    pub fn new(
        config: AuthConfig,
        cache: Arc<dyn KeyValueCache>,
        apps: Arc<dyn AppStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            config,
            cache,
            apps,
            users,
            protected_paths: Vec::new(),
        }
    }

    /// Config from `TOLLGATE_*` variables and the cache named by
    /// `TOLLGATE_CACHE_URL`.
    pub fn from_env(apps: Arc<dyn AppStore>, users: Arc<dyn UserStore>) -> anyhow::Result<Self> {
        Self::from_lookup(apps, users, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(apps: Arc<dyn AppStore>, users: Arc<dyn UserStore>, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = AuthConfig::from_lookup(&lookup);
        let cache = cache_from_url(lookup(CACHE_URL_ENV).as_deref())
            .with_context(|| format!("failed to set up cache from {CACHE_URL_ENV}"))?;
        tracing::info!(
            rate_limiting = config.rate_limiting_enabled,
            one_session_per_user = config.one_session_per_user,
            "service context ready"
        );
        Ok(Self::new(config, cache, apps, users))
    }

    pub fn with_protected_paths(mut self, protected_paths: Vec<ProtectedPath>) -> Self {
        self.protected_paths = protected_paths;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn cache(&self) -> Arc<dyn KeyValueCache> {
        self.cache.clone()
    }

    pub fn tokens(&self) -> TokenService {
        TokenService::new(&self.config)
    }

    pub fn signer(&self) -> Signer {
        Signer::new(&self.config)
    }

    pub fn csrf(&self) -> CsrfStore {
        CsrfStore::new(self.cache.clone(), &self.config)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.cache.clone(), self.config.rate_limits)
    }

    pub fn sessions(&self) -> SessionService {
        SessionService::new(self.apps.clone(), self.users.clone(), &self.config)
    }

    /// The standard step chain; throttling is attached only when enabled.
    pub fn authenticator(&self) -> RequestAuthenticator {
        let evaluator = PermissionEvaluator::new(self.protected_paths.clone());
        let authenticator =
            RequestAuthenticator::standard(self.apps.clone(), self.users.clone(), &self.config, evaluator);
        if self.config.rate_limiting_enabled {
            authenticator.with_rate_limiter(self.rate_limiter())
        } else {
            authenticator
        }
    }
}

/// Pick a cache backend: unset/`memory` is in-process, `redis://` and
/// `rediss://` need the `redis` feature.
pub fn cache_from_url(url: Option<&str>) -> anyhow::Result<Arc<dyn KeyValueCache>> {
    let url = url.map(str::trim).filter(|u| !u.is_empty());
    match url {
        None | Some("memory") => Ok(Arc::new(InMemoryCache::new())),
        Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => redis_cache(url),
        Some(other) => bail!("unsupported cache url scheme: {other}"),
    }
}

#[cfg(feature = "redis")]
fn redis_cache(url: &str) -> anyhow::Result<Arc<dyn KeyValueCache>> {
    let cache = crate::cache::RedisCache::open(url).context("invalid redis url")?;
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis"))]
fn redis_cache(_url: &str) -> anyhow::Result<Arc<dyn KeyValueCache>> {
    bail!("{CACHE_URL_ENV} points at redis but tollgate-infra was built without the `redis` feature")
}
