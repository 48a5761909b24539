//! Request authentication: resolve who is calling, then authorize and throttle.
//!
//! Credential schemes are tried in order by a list of [`AuthStep`]s; the
//! first step that recognises the request decides the identity (or the
//! rejection). Steps never fall through once they have claimed a request.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use tollgate_core::AppId;

use crate::permissions::PermissionEvaluator;
use crate::request::InboundRequest;
use crate::signer::{is_signed, parse_client_signature, request_date};
use crate::store::{AppStore, UserStore};
use crate::{AuthConfig, AuthError, Identity, RateLimiter, Signer, TokenService};

const BEARER_PREFIX: &str = "Bearer ";
const ANONYMOUS_PREFIX: &str = "Anonymous ";

/// One credential scheme.
pub trait AuthStep: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the request does not use this scheme.
    fn authenticate(&self, request: &InboundRequest, now: DateTime<Utc>) -> Result<Option<Identity>, AuthError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// App-signed requests
// ─────────────────────────────────────────────────────────────────────────────

pub struct SignedRequestStep {
    apps: Arc<dyn AppStore>,
    signer: Signer,
    expires_after_secs: i64,
}

impl SignedRequestStep {
    pub fn new(apps: Arc<dyn AppStore>, config: &AuthConfig) -> Self {
        Self {
            apps,
            signer: Signer::new(config),
            expires_after_secs: config.request_expires_after_secs,
        }
    }
}

impl AuthStep for SignedRequestStep {
    fn name(&self) -> &'static str {
        "signed-request"
    }

    fn authenticate(&self, request: &InboundRequest, now: DateTime<Utc>) -> Result<Option<Identity>, AuthError> {
        let parts = request.parts();
        if !is_signed(&parts) {
            return Ok(None);
        }

        // Stale requests are refused before any canonicalisation work.
        let date = request_date(&parts).ok_or(AuthError::MalformedRequest)?;
        if (now - date).num_seconds().abs() > self.expires_after_secs {
            return Err(AuthError::ExpiredRequest);
        }

        let client = parse_client_signature(&parts).ok_or(AuthError::MalformedRequest)?;
        let app_id = AppId::new(&client.access_key).map_err(|_| AuthError::UnknownTenant)?;
        let app = self.apps.find_app(&app_id).ok_or(AuthError::UnknownTenant)?;
        PermissionEvaluator::check_app_state(&app, request.http_method()?)?;

        if !self.signer.verify(&parts, &app.secret) {
            return Err(AuthError::InvalidSignature);
        }
        Ok(Some(Identity::App(app)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bearer tokens
// ─────────────────────────────────────────────────────────────────────────────

pub struct BearerTokenStep {
    apps: Arc<dyn AppStore>,
    users: Arc<dyn UserStore>,
    tokens: TokenService,
}

impl BearerTokenStep {
    pub fn new(apps: Arc<dyn AppStore>, users: Arc<dyn UserStore>, config: &AuthConfig) -> Self {
        Self {
            apps,
            users,
            tokens: TokenService::new(config),
        }
    }
}

/// The token of a `Bearer` authorization value, if that is the scheme.
pub fn bearer_token(request: &InboundRequest) -> Option<&str> {
    request
        .authorization()
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
}

/// Resolve a session token to the identity it was issued for.
///
/// Claims are only trusted after the signature verifies against the
/// composite key of the app (and user) they name.
pub fn resolve_token(
    apps: &dyn AppStore,
    users: &dyn UserStore,
    tokens: &TokenService,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Identity, AuthError> {
    let claims = tokens.peek_claims(token).ok_or(AuthError::InvalidToken)?;
    let app = apps.find_app(&claims.appid).ok_or(AuthError::InvalidToken)?;

    let identity = match &claims.sub {
        Some(sub) => {
            let user = users.find_user(&app.id, sub).ok_or(AuthError::InvalidToken)?;
            if !user.active {
                tracing::debug!(app_id = %app.id, user_id = %user.id, "token for inactive user");
                return Err(AuthError::InvalidToken);
            }
            let key = TokenService::signing_key(&app, Some(&user));
            if !tokens.validate(token, &key, now) {
                return Err(AuthError::InvalidToken);
            }
            Identity::User { app, user }
        }
        None => {
            if !tokens.validate(token, &app.secret, now) {
                return Err(AuthError::InvalidToken);
            }
            Identity::App(app)
        }
    };
    Ok(identity)
}

impl AuthStep for BearerTokenStep {
    fn name(&self) -> &'static str {
        "bearer-token"
    }

    fn authenticate(&self, request: &InboundRequest, now: DateTime<Utc>) -> Result<Option<Identity>, AuthError> {
        let Some(token) = bearer_token(request) else {
            return Ok(None);
        };
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        resolve_token(self.apps.as_ref(), self.users.as_ref(), &self.tokens, token, now).map(Some)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Guests
// ─────────────────────────────────────────────────────────────────────────────

/// `Authorization: Anonymous <appId>`: no credentials, only a tenant.
pub struct AnonymousStep {
    apps: Arc<dyn AppStore>,
}

impl AnonymousStep {
    pub fn new(apps: Arc<dyn AppStore>) -> Self {
        Self { apps }
    }
}

impl AuthStep for AnonymousStep {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    fn authenticate(&self, request: &InboundRequest, _now: DateTime<Utc>) -> Result<Option<Identity>, AuthError> {
        let Some(raw) = request
            .authorization()
            .and_then(|value| value.strip_prefix(ANONYMOUS_PREFIX))
        else {
            return Ok(None);
        };
        let app_id = AppId::new(raw.trim()).map_err(|_| AuthError::BadCredentials)?;
        let app = self.apps.find_app(&app_id).ok_or(AuthError::BadCredentials)?;
        Ok(Some(Identity::Anonymous { app }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

pub struct RequestAuthenticator {
    steps: Vec<Box<dyn AuthStep>>,
    evaluator: PermissionEvaluator,
    limiter: Option<RateLimiter>,
}

impl core::fmt::Debug for RequestAuthenticator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("RequestAuthenticator")
            .field("steps", &steps)
            .field("evaluator", &self.evaluator)
            .field("limiter", &self.limiter)
            .finish()
    }
}

impl RequestAuthenticator {
    pub fn new(steps: Vec<Box<dyn AuthStep>>, evaluator: PermissionEvaluator) -> Self {
        Self {
            steps,
            evaluator,
            limiter: None,
        }
    }

    /// Signed requests, then bearer tokens, then the anonymous scheme.
    pub fn standard(
        apps: Arc<dyn AppStore>,
        users: Arc<dyn UserStore>,
        config: &AuthConfig,
        evaluator: PermissionEvaluator,
    ) -> Self {
        let steps: Vec<Box<dyn AuthStep>> = vec![
            Box::new(SignedRequestStep::new(apps.clone(), config)),
            Box::new(BearerTokenStep::new(apps.clone(), users, config)),
            Box::new(AnonymousStep::new(apps)),
        ];
        Self::new(steps, evaluator)
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Resolve, authorize and (optionally) throttle one request.
    pub fn authenticate(&self, request: &InboundRequest, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        let result = self.run(request, now);
        if let Err(e) = &result {
            tracing::debug!(method = %request.method, path = %request.path, reason = e.code(), "request rejected");
        }
        result
    }

    fn run(&self, request: &InboundRequest, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        let method = request.http_method()?;
        let identity = self.identify(request, now)?;

        self.evaluator.authorize(&identity, &request.path, method)?;

        if let Some(limiter) = &self.limiter {
            let tenant = identity.app().id.as_str();
            if !limiter.is_allowed(tenant, &identity.key(), now.timestamp_millis()) {
                return Err(AuthError::RateLimited);
            }
        }

        tracing::debug!(app_id = %identity.app().id, identity = %identity.key(), path = %request.path, "request authenticated");
        Ok(identity)
    }

    fn identify(&self, request: &InboundRequest, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        for step in &self.steps {
            if let Some(identity) = step.authenticate(request, now)? {
                return Ok(identity);
            }
        }
        Err(AuthError::BadCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::{App, HttpMethod, PermissionRule, RateLimits, RuleSubject, User};
    use chrono::{Duration, TimeZone};
    use http::header::{AUTHORIZATION, CONTENT_TYPE};
    use http::{HeaderValue, Method};
    use tollgate_core::{InMemoryCache, UserId};

    const ENDPOINT: &str = "https://api.example.com";

    struct Fixture {
        apps: Arc<InMemoryStore<App>>,
        users: Arc<InMemoryStore<User>>,
        config: AuthConfig,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let apps = Arc::new(InMemoryStore::new());
        let users = Arc::new(InMemoryStore::new());
        let mut app = App::new(AppId::new("acme").unwrap(), "s3cr3t");
        app.grant(PermissionRule::new("users/*", RuleSubject::Own).methods([HttpMethod::Get]));
        app.grant(PermissionRule::new("public/*", RuleSubject::Any).allow_guests());
        apps.upsert(app);
        users.upsert(User::new(AppId::new("acme").unwrap(), UserId::new("u1").unwrap(), "fb:1"));
        Fixture {
            apps,
            users,
            config: AuthConfig::default(),
        }
    }

    impl Fixture {
        fn authenticator(&self) -> RequestAuthenticator {
            RequestAuthenticator::standard(
                self.apps.clone(),
                self.users.clone(),
                &self.config,
                PermissionEvaluator::default(),
            )
        }

        fn app(&self) -> App {
            self.apps.find_app(&AppId::new("acme").unwrap()).unwrap()
        }

        fn user_token(&self, at: DateTime<Utc>) -> String {
            let mut user = self
                .users
                .find_user(&AppId::new("acme").unwrap(), &UserId::new("u1").unwrap())
                .unwrap();
            let issued = TokenService::new(&self.config).issue(&self.app(), Some(&mut user), at).unwrap();
            self.users.save_user(&user).unwrap();
            issued.token
        }

        fn signed(&self, method: Method, path: &str, secret: &str, at: DateTime<Utc>) -> InboundRequest {
            let mut req = InboundRequest::new(method, path)
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(b"{\"a\":1}".to_vec());
            let signed = Signer::new(&self.config)
                .sign(ENDPOINT, &req.parts(), "app:acme", secret, at)
                .unwrap();
            signed.apply(&mut req.headers).unwrap();
            req
        }
    }

    fn bearer(req: InboundRequest, token: &str) -> InboundRequest {
        req.header(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap())
    }

    #[test]
    fn signed_request_resolves_to_app() {
        let fx = fixture();
        let req = fx.signed(Method::POST, "/users/99", "s3cr3t", now());
        let identity = fx.authenticator().authenticate(&req, now() + Duration::seconds(5)).unwrap();
        assert!(matches!(identity, Identity::App(ref app) if app.id.name() == "acme"));
    }

    #[test]
    fn signed_request_failures_map_to_their_kinds() {
        let fx = fixture();
        let auth = fx.authenticator();

        let stale = fx.signed(Method::GET, "/x", "s3cr3t", now() - Duration::seconds(901));
        assert_eq!(auth.authenticate(&stale, now()), Err(AuthError::ExpiredRequest));

        let forged = fx.signed(Method::GET, "/x", "wrong", now());
        assert_eq!(auth.authenticate(&forged, now()), Err(AuthError::InvalidSignature));

        let mut tampered = fx.signed(Method::POST, "/x", "s3cr3t", now());
        tampered.body = b"{\"a\":2}".to_vec();
        assert_eq!(auth.authenticate(&tampered, now()), Err(AuthError::InvalidSignature));

        let mut app = fx.app();
        app.read_only = true;
        fx.apps.upsert(app);
        let write = fx.signed(Method::POST, "/x", "s3cr3t", now());
        assert_eq!(auth.authenticate(&write, now()), Err(AuthError::TenantReadOnly));
    }

    #[test]
    fn signed_request_for_unknown_app_is_not_found() {
        let fx = fixture();
        let mut req = InboundRequest::new(Method::GET, "/x");
        let signed = Signer::new(&fx.config)
            .sign(ENDPOINT, &req.parts(), "app:ghost", "s", now())
            .unwrap();
        signed.apply(&mut req.headers).unwrap();
        assert_eq!(fx.authenticator().authenticate(&req, now()), Err(AuthError::UnknownTenant));
    }

    #[test]
    fn expired_presigned_url_stays_expired_with_a_fresh_date_header() {
        let fx = fixture();
        let auth = fx.authenticator();
        let mut req = InboundRequest::new(Method::GET, "/reports/7")
            .header(http::header::HOST, HeaderValue::from_static("api.example.com"));
        req.query = Signer::new(&fx.config)
            .presign(ENDPOINT, &req.parts(), "app:acme", "s3cr3t", now())
            .unwrap();
        assert!(auth.authenticate(&req, now() + Duration::seconds(60)).is_ok());

        let later = now() + Duration::days(30);
        assert_eq!(auth.authenticate(&req, later), Err(AuthError::ExpiredRequest));

        let replayed = req.header(
            http::HeaderName::from_static(crate::signer::DATE_HEADER),
            HeaderValue::from_str(&crate::signer::format_amz_date(later)).unwrap(),
        );
        assert_eq!(auth.authenticate(&replayed, later), Err(AuthError::ExpiredRequest));
    }

    #[test]
    fn bearer_token_resolves_to_user_and_is_authorized() {
        let fx = fixture();
        let token = fx.user_token(now());
        let auth = fx.authenticator();

        let own = bearer(InboundRequest::new(Method::GET, "/users/u1"), &token);
        let identity = auth.authenticate(&own, now()).unwrap();
        assert_eq!(identity.user().map(|u| u.id.as_str()), Some("u1"));

        let other = bearer(InboundRequest::new(Method::GET, "/users/u2"), &token);
        assert_eq!(auth.authenticate(&other, now()), Err(AuthError::PermissionDenied));
    }

    #[test]
    fn bearer_token_may_arrive_as_query_param() {
        let fx = fixture();
        let token = fx.user_token(now());
        let req = InboundRequest::new(Method::GET, "/users/u1").query_param("Authorization", format!("Bearer {token}"));
        assert!(fx.authenticator().authenticate(&req, now()).is_ok());
    }

    #[test]
    fn invalid_tokens_are_unauthorized() {
        let fx = fixture();
        let auth = fx.authenticator();
        let token = fx.user_token(now());

        let expired = bearer(InboundRequest::new(Method::GET, "/users/u1"), &token);
        assert_eq!(auth.authenticate(&expired, now() + Duration::days(2)), Err(AuthError::InvalidToken));

        let garbage = bearer(InboundRequest::new(Method::GET, "/users/u1"), "not.a.jwt");
        assert_eq!(auth.authenticate(&garbage, now()), Err(AuthError::InvalidToken));

        // a second sign-in rotates the secret and revokes the first token
        let _second = fx.user_token(now());
        let revoked = bearer(InboundRequest::new(Method::GET, "/users/u1"), &token);
        assert_eq!(auth.authenticate(&revoked, now()), Err(AuthError::InvalidToken));
    }

    #[test]
    fn super_token_resolves_to_app() {
        let fx = fixture();
        let issued = TokenService::new(&fx.config).issue(&fx.app(), None, now()).unwrap();
        let req = bearer(InboundRequest::new(Method::DELETE, "/users/u1"), &issued.token);
        let identity = fx.authenticator().authenticate(&req, now()).unwrap();
        assert!(matches!(identity, Identity::App(_)));
    }

    #[test]
    fn guests_need_the_anonymous_scheme_and_a_guest_rule() {
        let fx = fixture();
        let auth = fx.authenticator();

        let bare = InboundRequest::new(Method::GET, "/public/readme");
        assert_eq!(auth.authenticate(&bare, now()), Err(AuthError::BadCredentials));

        let guest = InboundRequest::new(Method::GET, "/public/readme")
            .header(AUTHORIZATION, HeaderValue::from_static("Anonymous app:acme"));
        assert!(matches!(auth.authenticate(&guest, now()), Ok(Identity::Anonymous { .. })));

        let private = InboundRequest::new(Method::GET, "/users/u1")
            .header(AUTHORIZATION, HeaderValue::from_static("Anonymous acme"));
        assert_eq!(auth.authenticate(&private, now()), Err(AuthError::PermissionDenied));

        let unknown = InboundRequest::new(Method::GET, "/public/readme")
            .header(AUTHORIZATION, HeaderValue::from_static("Anonymous ghost"));
        assert_eq!(auth.authenticate(&unknown, now()), Err(AuthError::BadCredentials));
    }

    #[test]
    fn throttles_per_identity_when_enabled() {
        let fx = fixture();
        let limiter = RateLimiter::new(Arc::new(InMemoryCache::new()), RateLimits::new(1, 10));
        let auth = fx.authenticator().with_rate_limiter(limiter);
        let guest = InboundRequest::new(Method::GET, "/public/readme")
            .header(AUTHORIZATION, HeaderValue::from_static("Anonymous acme"));

        assert!(auth.authenticate(&guest, now()).is_ok());
        assert_eq!(auth.authenticate(&guest, now()), Err(AuthError::RateLimited));
        assert!(auth.authenticate(&guest, now() + Duration::minutes(1)).is_ok());
    }
}
