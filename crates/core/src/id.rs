//! Strongly-typed identifiers used across the auth core.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Prefix carried by every app identifier (`app:acme`).
pub const APP_ID_PREFIX: &str = "app:";

/// Identifier of an app (the multi-tenant boundary).
///
/// Always stored in its prefixed form. The same value doubles as the access
/// key in signed requests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppId(String);

/// Identifier of a user within an app.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl AppId {
    /// Build an app id from a bare name or an already prefixed id.
    pub fn new(name: &str) -> DomainResult<Self> {
        let bare = name.strip_prefix(APP_ID_PREFIX).unwrap_or(name).trim();
        if bare.is_empty() {
            return Err(DomainError::invalid_id("AppId: empty"));
        }
        if bare.contains(|c: char| c == '/' || c.is_whitespace()) {
            return Err(DomainError::invalid_id(format!(
                "AppId: '{bare}' contains '/' or whitespace"
            )));
        }
        Ok(Self(format!("{APP_ID_PREFIX}{bare}")))
    }

    /// The name without the `app:` prefix.
    pub fn name(&self) -> &str {
        self.0.strip_prefix(APP_ID_PREFIX).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl UserId {
    pub fn new(id: &str) -> DomainResult<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DomainError::invalid_id("UserId: empty"));
        }
        if id.contains('/') {
            return Err(DomainError::invalid_id(format!("UserId: '{id}' contains '/'")));
        }
        // App identities key their throttling and CSRF state by `app:<name>`.
        if id.starts_with(APP_ID_PREFIX) {
            return Err(DomainError::invalid_id(format!("UserId: '{id}' uses the app prefix")));
        }
        Ok(Self(id.to_string()))
    }

    /// Generate a fresh identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_string_id {
    ($t:ty) => {
        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_id!(AppId);
impl_string_id!(UserId);
