//! `tollgate-auth`: request authentication and authorization for
//! multi-tenant apps.
//!
//! The crate is decoupled from any HTTP server and from persistence: it
//! works on a buffered [`InboundRequest`] and reaches apps, users and the
//! shared cache through traits.

pub mod authenticate;
pub mod claims;
pub mod config;
pub mod csrf;
pub mod error;
pub mod identity;
pub mod permissions;
pub mod protected;
pub mod rate_limit;
pub mod request;
pub mod roles;
pub mod session;
pub mod signer;
pub mod store;
pub mod token;

pub use authenticate::{AnonymousStep, AuthStep, BearerTokenStep, RequestAuthenticator, SignedRequestStep};
pub use claims::{validate_claims, IdentityClaims, SessionClaims, TokenValidationError};
pub use config::{AuthConfig, RateLimits};
pub use csrf::CsrfStore;
pub use error::AuthError;
pub use identity::{generate_secret, App, HttpMethod, Identity, PermissionRule, RuleSubject, User};
pub use permissions::PermissionEvaluator;
pub use protected::ProtectedPath;
pub use rate_limit::RateLimiter;
pub use request::InboundRequest;
pub use roles::Role;
pub use session::{IdTokenProvider, IdentityProvider, SessionError, SessionService, TokenResponse, VerifiedIdentity};
pub use signer::{RequestParts, SignedRequest, Signer};
pub use store::{AppStore, InMemoryStore, StoreError, StoreKey, UserStore};
pub use token::{IssuedIdentityToken, IssuedToken, SigningError, TokenService};
