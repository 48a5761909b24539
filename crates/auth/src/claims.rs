use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tollgate_core::{AppId, UserId};

/// Claims of a session token.
///
/// A token without `sub` is a super token: it authenticates as the app
/// itself. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    /// When the client should ask for a fresh token.
    pub refresh: i64,
    pub appid: AppId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp: Option<String>,
}

impl SessionClaims {
    pub fn is_super(&self) -> bool {
        self.sub.is_none()
    }
}

/// Claims of a short-lived identity token, proving a freshly verified
/// external identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub appid: AppId,
    pub sub: UserId,
    pub name: String,
    pub email: String,
    pub identifier: String,
    pub picture: String,
}

/// Claims carrying a validity window.
pub trait TimeWindow {
    fn issued_at(&self) -> i64;
    fn not_before(&self) -> i64;
    fn expires_at(&self) -> i64;
}

impl TimeWindow for SessionClaims {
    fn issued_at(&self) -> i64 {
        self.iat
    }

    fn not_before(&self) -> i64 {
        self.nbf
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }
}

impl TimeWindow for IdentityClaims {
    fn issued_at(&self) -> i64 {
        self.iat
    }

    fn not_before(&self) -> i64 {
        self.nbf
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token could not be decoded")]
    Malformed,

    #[error("token signature does not match")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Check the validity window: valid iff `nbf <= now < exp`.
pub fn validate_claims<C: TimeWindow>(claims: &C, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at() <= claims.issued_at() {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now < claims.not_before() {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at() {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Unix seconds to a UTC timestamp (saturating to the epoch on overflow).
pub fn to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}
