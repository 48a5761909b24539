//! Session and identity token issuance/validation (HS256).
//!
//! Tokens are signed with the app secret, concatenated with the user's token
//! secret when the token has a subject. Rotating either secret therefore
//! revokes every token signed with the old value, with no blocklist.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::claims::{validate_claims, IdentityClaims, SessionClaims, TimeWindow, TokenValidationError};
use crate::{App, AuthConfig, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("token signing failed: {0}")]
    Crypto(String),
}

/// A freshly issued session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: SessionClaims,
}

/// A freshly issued identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedIdentityToken {
    pub token: String,
    pub claims: IdentityClaims,
}

#[derive(Debug, Clone)]
pub struct TokenService {
    refresh_interval_secs: i64,
    id_token_expires_after_secs: i64,
    one_session_per_user: bool,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            refresh_interval_secs: config.jwt_refresh_interval_secs,
            id_token_expires_after_secs: config.id_token_expires_after_secs,
            one_session_per_user: config.one_session_per_user,
        }
    }

    /// `app.secret`, plus `user.token_secret` when a user is present.
    pub fn signing_key(app: &App, user: Option<&User>) -> String {
        match user {
            Some(user) => format!("{}{}", app.secret, user.token_secret),
            None => app.secret.clone(),
        }
    }

    /// Seconds until the client should refresh: the configured interval or
    /// half the token lifetime, whichever is sooner.
    pub fn refresh_delay_secs(&self, token_validity_secs: i64) -> i64 {
        self.refresh_interval_secs.min(token_validity_secs / 2)
    }

    /// Issue a session token for `user`, or a super token when `user` is
    /// `None`.
    ///
    /// With one-session-per-user on, the user's token secret is rotated
    /// first; the caller must persist the user afterwards.
    pub fn issue(&self, app: &App, user: Option<&mut User>, now: DateTime<Utc>) -> Result<IssuedToken, SigningError> {
        let iat = now.timestamp();
        let (sub, idp, key) = match user {
            Some(user) => {
                if self.one_session_per_user {
                    user.rotate_token_secret();
                }
                (
                    Some(user.id.clone()),
                    Some(user.identity_provider.clone()),
                    Self::signing_key(app, Some(&*user)),
                )
            }
            None => (None, None, Self::signing_key(app, None)),
        };

        let claims = SessionClaims {
            iat,
            exp: iat + app.token_validity_secs,
            nbf: iat,
            refresh: iat + self.refresh_delay_secs(app.token_validity_secs),
            appid: app.id.clone(),
            sub,
            idp,
        };
        let token = sign(&claims, &key)?;

        tracing::info!(
            app_id = %app.id,
            subject = claims.sub.as_ref().map(|s| s.as_str()).unwrap_or("<app>"),
            expires = claims.exp,
            "issued session token"
        );

        Ok(IssuedToken { token, claims })
    }

    /// Issue a short-lived token carrying the user's public profile.
    pub fn issue_identity_token(&self, app: &App, user: &User, now: DateTime<Utc>) -> Result<IssuedIdentityToken, SigningError> {
        let iat = now.timestamp();
        let claims = IdentityClaims {
            iat,
            exp: iat + self.id_token_expires_after_secs,
            nbf: iat,
            appid: app.id.clone(),
            sub: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            identifier: user.identifier.clone(),
            picture: user.picture.clone(),
        };
        let token = sign(&claims, &Self::signing_key(app, Some(user)))?;

        tracing::debug!(app_id = %app.id, subject = %user.id, "issued identity token");

        Ok(IssuedIdentityToken { token, claims })
    }

    /// Verify signature and validity window of a session token.
    pub fn verify(&self, token: &str, secret: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenValidationError> {
        verify_as(token, secret, now)
    }

    pub fn verify_identity_token(
        &self,
        token: &str,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<IdentityClaims, TokenValidationError> {
        verify_as(token, secret, now)
    }

    /// `true` iff the signature matches `secret` and `nbf <= now < exp`.
    /// Never fails.
    pub fn validate(&self, token: &str, secret: &str, now: DateTime<Utc>) -> bool {
        match self.verify(token, secret, now) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(reason = %e, "token rejected");
                false
            }
        }
    }

    /// Decode session claims without checking the signature or time window.
    ///
    /// Only for routing (finding the app/user whose secret verifies the
    /// token); never trust the result.
    pub fn peek_claims(&self, token: &str) -> Option<SessionClaims> {
        peek_as(token)
    }

    /// [`TokenService::peek_claims`] for identity tokens.
    pub fn peek_identity_claims(&self, token: &str) -> Option<IdentityClaims> {
        peek_as(token)
    }
}

fn peek_as<C: DeserializeOwned>(token: &str) -> Option<C> {
    let mut validation = lenient_validation();
    validation.insecure_disable_signature_validation();
    jsonwebtoken::decode::<C>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

fn sign<C: Serialize>(claims: &C, key: &str) -> Result<String, SigningError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(key.as_bytes()),
    )
    .map_err(|e| SigningError::Crypto(e.to_string()))
}

/// HS256 only; time checks happen in `validate_claims` against the caller's
/// clock, so the library's own are switched off.
fn lenient_validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.leeway = 0;
    validation.required_spec_claims = HashSet::new();
    validation
}

fn verify_as<C>(token: &str, secret: &str, now: DateTime<Utc>) -> Result<C, TokenValidationError>
where
    C: DeserializeOwned + TimeWindow,
{
    let data = jsonwebtoken::decode::<C>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &lenient_validation(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::InvalidSignature => TokenValidationError::BadSignature,
        _ => TokenValidationError::Malformed,
    })?;

    validate_claims(&data.claims, now)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::to_datetime;
    use proptest::prelude::*;
    use tollgate_core::{AppId, UserId};

    fn acme() -> App {
        let mut app = App::new(AppId::new("acme").unwrap(), "s3cr3t");
        app.token_validity_secs = 3600;
        app
    }

    fn u1(app: &App) -> User {
        let mut user = User::new(app.id.clone(), UserId::new("u1").unwrap(), "fb:12345");
        user.token_secret = "abc".to_string();
        user
    }

    fn service(one_session_per_user: bool) -> TokenService {
        TokenService::new(&AuthConfig {
            one_session_per_user,
            ..AuthConfig::default()
        })
    }

    #[test]
    fn refresh_is_half_validity_when_sooner_than_interval() {
        let svc = service(false);
        let app = acme();
        let mut user = u1(&app);
        let t0 = to_datetime(1_700_000_000);

        let issued = svc.issue(&app, Some(&mut user), t0).unwrap();
        assert_eq!(issued.claims.refresh, t0.timestamp() + 1800);
        assert_eq!(issued.claims.exp, t0.timestamp() + 3600);
        assert_eq!(issued.claims.sub, Some(user.id.clone()));
        assert_eq!(issued.claims.idp.as_deref(), Some("fb"));

        let key = TokenService::signing_key(&app, Some(&user));
        assert_eq!(key, "s3cr3tabc");
        assert!(svc.validate(&issued.token, &key, to_datetime(t0.timestamp() + 1799)));
        assert!(!svc.validate(&issued.token, &key, to_datetime(t0.timestamp() + 3601)));
    }

    #[test]
    fn refresh_uses_interval_for_long_lived_tokens() {
        let svc = service(false);
        let mut app = acme();
        app.token_validity_secs = 86_400 * 7;
        let issued = svc.issue(&app, None, to_datetime(0)).unwrap();
        assert_eq!(issued.claims.refresh, 3600);
    }

    #[test]
    fn rotating_token_secret_revokes_old_tokens() {
        let svc = service(false);
        let app = acme();
        let mut user = u1(&app);
        let now = to_datetime(1_000_000);

        let t1 = svc.issue(&app, Some(&mut user), now).unwrap();
        user.rotate_token_secret();
        let key = TokenService::signing_key(&app, Some(&user));

        assert_eq!(svc.verify(&t1.token, &key, now), Err(TokenValidationError::BadSignature));

        let t2 = svc.issue(&app, Some(&mut user), now).unwrap();
        assert!(svc.validate(&t2.token, &key, now));
    }

    #[test]
    fn one_session_per_user_rotates_on_issue() {
        let svc = service(true);
        let app = acme();
        let mut user = u1(&app);
        let now = to_datetime(1_000_000);

        let first = svc.issue(&app, Some(&mut user), now).unwrap();
        let first_key = TokenService::signing_key(&app, Some(&user));
        assert_ne!(user.token_secret, "abc");

        let second = svc.issue(&app, Some(&mut user), now).unwrap();
        let second_key = TokenService::signing_key(&app, Some(&user));

        assert!(!svc.validate(&first.token, &second_key, now));
        assert!(svc.validate(&second.token, &second_key, now));
        assert_ne!(first_key, second_key);
    }

    #[test]
    fn super_token_validates_against_app_secret_only() {
        let svc = service(false);
        let app = acme();
        let user = u1(&app);
        let now = to_datetime(1_000_000);

        let issued = svc.issue(&app, None, now).unwrap();
        assert!(issued.claims.is_super());
        assert!(svc.validate(&issued.token, &app.secret, now));
        assert!(!svc.validate(&issued.token, &TokenService::signing_key(&app, Some(&user)), now));
    }

    #[test]
    fn identity_token_carries_profile_and_expires_quickly() {
        let svc = service(false);
        let app = acme();
        let mut user = u1(&app);
        user.name = "Alice".to_string();
        user.email = "alice@example.com".to_string();
        let now = to_datetime(1_000_000);

        let issued = svc.issue_identity_token(&app, &user, now).unwrap();
        let key = TokenService::signing_key(&app, Some(&user));

        let claims = svc.verify_identity_token(&issued.token, &key, now).unwrap();
        assert_eq!(claims.name, "Alice");
        assert_eq!(claims.identifier, "fb:12345");
        assert_eq!(
            svc.verify_identity_token(&issued.token, &key, to_datetime(1_000_060)),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn garbage_is_rejected_without_panicking() {
        let svc = service(false);
        let now = to_datetime(0);
        assert!(!svc.validate("not-a-token", "key", now));
        assert!(!svc.validate("", "key", now));
        assert!(svc.peek_claims("a.b.c").is_none());
    }

    #[test]
    fn peek_reads_claims_without_the_key() {
        let svc = service(false);
        let app = acme();
        let mut user = u1(&app);
        let issued = svc.issue(&app, Some(&mut user), to_datetime(42)).unwrap();

        let peeked = svc.peek_claims(&issued.token).unwrap();
        assert_eq!(peeked, issued.claims);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: a token is valid iff nbf <= now < exp.
        #[test]
        fn validity_window_boundaries(t0 in 1_000i64..4_000_000_000i64, validity in 2i64..1_000_000i64) {
            let svc = service(false);
            let mut app = acme();
            app.token_validity_secs = validity;
            let issued = svc.issue(&app, None, to_datetime(t0)).unwrap();
            let nbf = issued.claims.nbf;
            let exp = issued.claims.exp;

            let checks = [
                (nbf - 1, false),
                (nbf, true),
                (exp - 1, true),
                (exp, false),
            ];
            for (at, expected) in checks {
                prop_assert_eq!(svc.validate(&issued.token, &app.secret, to_datetime(at)), expected);
            }
        }
    }
}
