//! Session token lifecycle: sign in, refresh, revoke.
//!
//! This is the transport-free core of the `/jwt_auth` endpoints. External
//! identities are verified by named [`IdentityProvider`] adapters; the
//! built-in [`IdTokenProvider`] accepts identity tokens issued by
//! [`TokenService::issue_identity_token`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use tollgate_core::{AppId, UserId};

use crate::authenticate::resolve_token;
use crate::permissions::PermissionEvaluator;
use crate::store::{AppStore, StoreError, UserStore};
use crate::token::SigningError;
use crate::{App, AuthConfig, AuthError, HttpMethod, Identity, TokenService, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a provider vouches for after checking a credential.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifiedIdentity {
    /// Provider-qualified login, e.g. `fb:12345`.
    pub identifier: String,
    pub name: String,
    pub email: String,
    pub picture: String,
}

/// Verifies a credential issued by some external identity system.
pub trait IdentityProvider: Send + Sync {
    /// Name clients use to select this provider.
    fn name(&self) -> &str;

    /// `None` when the credential does not check out.
    fn verify(&self, app: &App, credential: &str, now: DateTime<Utc>) -> Option<VerifiedIdentity>;
}

/// Accepts identity tokens signed for an existing user of `app`.
pub struct IdTokenProvider {
    users: Arc<dyn UserStore>,
    tokens: TokenService,
}

impl IdTokenProvider {
    pub const NAME: &'static str = "id_token";

    pub fn new(users: Arc<dyn UserStore>, tokens: TokenService) -> Self {
        Self { users, tokens }
    }
}

impl IdentityProvider for IdTokenProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn verify(&self, app: &App, credential: &str, now: DateTime<Utc>) -> Option<VerifiedIdentity> {
        let peeked = self.tokens.peek_identity_claims(credential)?;
        if peeked.appid != app.id {
            return None;
        }
        let user = self.users.find_user(&app.id, &peeked.sub)?;
        let key = TokenService::signing_key(app, Some(&user));
        match self.tokens.verify_identity_token(credential, &key, now) {
            Ok(claims) => Some(VerifiedIdentity {
                identifier: claims.identifier,
                name: claims.name,
                email: claims.email,
                picture: claims.picture,
            }),
            Err(e) => {
                tracing::debug!(app_id = %app.id, reason = %e, "identity token rejected");
                None
            }
        }
    }
}

/// `{access_token, refresh, expires}`; times are epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JwtInfo {
    pub access_token: String,
    pub refresh: i64,
    pub expires: i64,
}

/// The user fields safe to hand back to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub appid: AppId,
    pub identifier: String,
    pub identity_provider: String,
    pub name: String,
    pub email: String,
    pub picture: String,
    pub is_admin: bool,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            appid: user.app_id.clone(),
            identifier: user.identifier.clone(),
            identity_provider: user.identity_provider.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            picture: user.picture.clone(),
            is_admin: user.is_admin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenResponse {
    pub jwt: JwtInfo,
    /// Absent for super tokens.
    pub user: Option<UserProfile>,
}

pub struct SessionService {
    apps: Arc<dyn AppStore>,
    users: Arc<dyn UserStore>,
    tokens: TokenService,
    providers: BTreeMap<String, Arc<dyn IdentityProvider>>,
}

impl core::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionService")
            .field("tokens", &self.tokens)
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SessionService {
    /// A service with the built-in [`IdTokenProvider`] registered.
    pub fn new(apps: Arc<dyn AppStore>, users: Arc<dyn UserStore>, config: &AuthConfig) -> Self {
        let tokens = TokenService::new(config);
        let id_tokens = IdTokenProvider::new(users.clone(), tokens.clone());
        Self {
            apps,
            users,
            tokens,
            providers: BTreeMap::new(),
        }
        .with_provider(Arc::new(id_tokens))
    }

    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    /// Verify `credential` with `provider`, find or create the user it names,
    /// and issue a session token.
    pub fn sign_in(
        &self,
        provider: &str,
        app_id: &AppId,
        credential: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenResponse, SessionError> {
        let app = self.apps.find_app(app_id).ok_or(AuthError::UnknownTenant)?;
        PermissionEvaluator::check_app_state(&app, HttpMethod::Get)?;

        let Some(adapter) = self.providers.get(provider) else {
            tracing::debug!(provider, "unknown identity provider");
            return Err(AuthError::BadCredentials.into());
        };
        let verified = adapter
            .verify(&app, credential, now)
            .ok_or(AuthError::BadCredentials)?;

        let mut user = match self.users.find_by_identifier(&app.id, &verified.identifier) {
            Some(user) => user,
            None => {
                let mut user = User::new(app.id.clone(), UserId::generate(), verified.identifier.clone());
                user.name = verified.name;
                user.email = verified.email;
                user.picture = verified.picture;
                tracing::info!(app_id = %app.id, user_id = %user.id, provider, "created user on first sign-in");
                user
            }
        };
        if !user.active {
            return Err(AuthError::AccountLocked.into());
        }

        let response = self.issue_for_user(&app, &mut user, now)?;
        tracing::info!(app_id = %app.id, user_id = %user.id, provider, "signed in");
        Ok(response)
    }

    /// Re-validate `bearer` and issue a fresh token for the same identity.
    pub fn refresh(&self, bearer: &str, now: DateTime<Utc>) -> Result<TokenResponse, SessionError> {
        match self.resolve(bearer, now)? {
            Identity::User { app, mut user } => self.issue_for_user(&app, &mut user, now),
            Identity::App(app) => {
                let issued = self.tokens.issue(&app, None, now)?;
                Ok(TokenResponse {
                    jwt: JwtInfo {
                        access_token: issued.token,
                        refresh: issued.claims.refresh,
                        expires: issued.claims.exp,
                    },
                    user: None,
                })
            }
            Identity::Anonymous { .. } => Err(AuthError::BadCredentials.into()),
        }
    }

    /// Revoke every token of the user `bearer` belongs to.
    pub fn revoke(&self, bearer: &str, now: DateTime<Utc>) -> Result<(), SessionError> {
        let Identity::User { app, mut user } = self.resolve(bearer, now)? else {
            return Err(AuthError::BadCredentials.into());
        };
        user.rotate_token_secret();
        self.users.save_user(&user)?;
        tracing::info!(app_id = %app.id, user_id = %user.id, "revoked all session tokens");
        Ok(())
    }

    fn resolve(&self, bearer: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        let identity = resolve_token(self.apps.as_ref(), self.users.as_ref(), &self.tokens, bearer.trim(), now)?;
        PermissionEvaluator::check_app_state(identity.app(), HttpMethod::Get)?;
        Ok(identity)
    }

    fn issue_for_user(&self, app: &App, user: &mut User, now: DateTime<Utc>) -> Result<TokenResponse, SessionError> {
        let issued = self.tokens.issue(app, Some(&mut *user), now)?;
        // the secret may have been rotated
        self.users.save_user(user)?;
        Ok(TokenResponse {
            jwt: JwtInfo {
                access_token: issued.token,
                refresh: issued.claims.refresh,
                expires: issued.claims.exp,
            },
            user: Some(UserProfile::from(&*user)),
        })
    }
}
