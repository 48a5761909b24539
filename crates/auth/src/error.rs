//! Rejection taxonomy surfaced to the HTTP layer.

use http::StatusCode;
use thiserror::Error;

/// Why a request (or a strict-mode credential check) was refused.
///
/// Messages are short and never carry internal detail; they are safe to echo
/// to clients.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed request")]
    MalformedRequest,

    #[error("request has expired")]
    ExpiredRequest,

    #[error("invalid request signature")]
    InvalidSignature,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("unknown app")]
    UnknownTenant,

    #[error("app is inactive")]
    TenantInactive,

    #[error("app is read-only")]
    TenantReadOnly,

    #[error("permission denied")]
    PermissionDenied,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("account is locked")]
    AccountLocked,

    #[error("bad credentials")]
    BadCredentials,
}

impl AuthError {
    /// HTTP status for this rejection.
    ///
    /// `RateLimited` has no fixed status; the caller picks one.
    pub fn status(&self) -> Option<StatusCode> {
        let status = match self {
            AuthError::MalformedRequest | AuthError::ExpiredRequest => StatusCode::BAD_REQUEST,
            AuthError::InvalidToken | AuthError::BadCredentials => StatusCode::UNAUTHORIZED,
            AuthError::InvalidSignature
            | AuthError::TenantInactive
            | AuthError::TenantReadOnly
            | AuthError::PermissionDenied
            | AuthError::AccountLocked => StatusCode::FORBIDDEN,
            AuthError::UnknownTenant => StatusCode::NOT_FOUND,
            AuthError::RateLimited => return None,
        };
        Some(status)
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MalformedRequest => "malformed_request",
            AuthError::ExpiredRequest => "expired_request",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidToken => "invalid_token",
            AuthError::UnknownTenant => "unknown_app",
            AuthError::TenantInactive => "app_inactive",
            AuthError::TenantReadOnly => "app_read_only",
            AuthError::PermissionDenied => "permission_denied",
            AuthError::RateLimited => "rate_limited",
            AuthError::AccountLocked => "account_locked",
            AuthError::BadCredentials => "bad_credentials",
        }
    }

    /// Value for the `WWW-Authenticate` response header, when one is due.
    pub fn www_authenticate(&self) -> Option<&'static str> {
        match self {
            AuthError::InvalidToken => Some(r#"Bearer error="invalid_token""#),
            _ => None,
        }
    }
}
