//! Runtime settings consumed by the auth core.
//!
//! Loading from files is someone else's job; this type only knows its
//! defaults and how to read overrides from the environment.

use serde::{Deserialize, Serialize};

/// Per-identity throttle limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
}

impl RateLimits {
    /// Limits where the daily cap is 24x the hourly one.
    pub fn new(per_minute: u64, per_hour: u64) -> Self {
        Self {
            per_minute,
            per_hour,
            per_day: per_hour.saturating_mul(24),
        }
    }

    pub fn with_per_day(mut self, per_day: u64) -> Self {
        self.per_day = per_day;
        self
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::new(60, 10)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Maximum age of a signed request's `X-Amz-Date`.
    pub request_expires_after_secs: i64,
    /// Upper bound on the refresh schedule of session tokens.
    pub jwt_refresh_interval_secs: i64,
    /// Lifetime of identity tokens.
    pub id_token_expires_after_secs: i64,
    /// Rotate the user's token secret on every sign-in.
    pub one_session_per_user: bool,
    /// TTL of CSRF bindings.
    pub session_timeout_secs: i64,
    pub rate_limiting_enabled: bool,
    pub rate_limits: RateLimits,
    pub signing_region: String,
    pub signing_service: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            request_expires_after_secs: 900,
            jwt_refresh_interval_secs: 3600,
            id_token_expires_after_secs: 60,
            one_session_per_user: true,
            session_timeout_secs: 86_400,
            rate_limiting_enabled: false,
            rate_limits: RateLimits::default(),
            signing_region: "us-east-1".to_string(),
            signing_service: "tollgate".to_string(),
        }
    }
}

impl AuthConfig {
    /// Defaults overridden by `TOLLGATE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AuthConfig::from_env`] but with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        override_parsed(&lookup, "TOLLGATE_REQUEST_EXPIRES_AFTER_SECS", &mut cfg.request_expires_after_secs);
        override_parsed(&lookup, "TOLLGATE_JWT_REFRESH_INTERVAL_SECS", &mut cfg.jwt_refresh_interval_secs);
        override_parsed(&lookup, "TOLLGATE_ID_TOKEN_EXPIRES_AFTER_SECS", &mut cfg.id_token_expires_after_secs);
        override_parsed(&lookup, "TOLLGATE_ONE_SESSION_PER_USER", &mut cfg.one_session_per_user);
        override_parsed(&lookup, "TOLLGATE_SESSION_TIMEOUT_SECS", &mut cfg.session_timeout_secs);
        override_parsed(&lookup, "TOLLGATE_RATE_LIMITING_ENABLED", &mut cfg.rate_limiting_enabled);

        let mut per_minute = cfg.rate_limits.per_minute;
        let mut per_hour = cfg.rate_limits.per_hour;
        override_parsed(&lookup, "TOLLGATE_RATE_LIMIT_PER_MINUTE", &mut per_minute);
        override_parsed(&lookup, "TOLLGATE_RATE_LIMIT_PER_HOUR", &mut per_hour);
        cfg.rate_limits = RateLimits::new(per_minute, per_hour);
        override_parsed(&lookup, "TOLLGATE_RATE_LIMIT_PER_DAY", &mut cfg.rate_limits.per_day);

        if let Some(region) = lookup("TOLLGATE_SIGNING_REGION") {
            cfg.signing_region = region;
        }
        if let Some(service) = lookup("TOLLGATE_SIGNING_SERVICE") {
            cfg.signing_service = service;
        }

        cfg
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config override"),
    }
}
