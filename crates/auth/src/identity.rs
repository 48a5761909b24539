//! Identity model: apps (tenants), users, permission rules and the resolved
//! identity of a request.

use std::collections::BTreeSet;

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use tollgate_core::{AppId, DomainError, Entity, UserId};

use crate::Role;

/// Default lifetime of session tokens issued for an app.
pub const DEFAULT_TOKEN_VALIDITY_SECS: i64 = 86_400;

/// 32 random bytes, base64url without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP methods
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    /// Methods a read-only app may never use.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl core::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for HttpMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(DomainError::validation(format!("unsupported HTTP method '{other}'"))),
        }
    }
}

impl TryFrom<&http::Method> for HttpMethod {
    type Error = DomainError;

    fn try_from(value: &http::Method) -> Result<Self, Self::Error> {
        value.as_str().parse()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission rules
// ─────────────────────────────────────────────────────────────────────────────

/// Who a permission rule is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleSubject {
    /// `*`: every authenticated user (and guests, if the rule allows them).
    Any,
    /// `self`: a user acting on a path that names their own id.
    Own,
    /// A single user.
    Id(UserId),
}

impl TryFrom<String> for RuleSubject {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "*" => Ok(RuleSubject::Any),
            "self" | "own" => Ok(RuleSubject::Own),
            id => Ok(RuleSubject::Id(UserId::new(id)?)),
        }
    }
}

impl From<RuleSubject> for String {
    fn from(value: RuleSubject) -> Self {
        match value {
            RuleSubject::Any => "*".to_string(),
            RuleSubject::Own => "self".to_string(),
            RuleSubject::Id(id) => id.into(),
        }
    }
}

/// One entry of an app's ordered permission list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Path glob, e.g. `users/*`. Leading/trailing slashes are ignored.
    pub resource: String,
    pub subject: RuleSubject,
    /// Empty = every method.
    #[serde(default)]
    pub methods: BTreeSet<HttpMethod>,
    /// Extends an `Any` rule to unauthenticated requests.
    #[serde(default)]
    pub allow_guests: bool,
}

impl PermissionRule {
    pub fn new(resource: impl Into<String>, subject: RuleSubject) -> Self {
        Self {
            resource: resource.into(),
            subject,
            methods: BTreeSet::new(),
            allow_guests: false,
        }
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn allow_guests(mut self) -> Self {
        self.allow_guests = true;
        self
    }

    pub fn applies_to_method(&self, method: HttpMethod) -> bool {
        self.methods.is_empty() || self.methods.contains(&method)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// App
// ─────────────────────────────────────────────────────────────────────────────

/// A tenant: its own secret, users and permission rules.
///
/// # Invariants
/// - An app can always read/modify itself.
/// - A non-root app can never read/modify another app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub secret: String,
    pub active: bool,
    pub read_only: bool,
    pub token_validity_secs: i64,
    pub is_root: bool,
    #[serde(default)]
    pub permissions: Vec<PermissionRule>,
}

impl App {
    pub fn new(id: AppId, secret: impl Into<String>) -> Self {
        Self {
            id,
            secret: secret.into(),
            active: true,
            read_only: false,
            token_validity_secs: DEFAULT_TOKEN_VALIDITY_SECS,
            is_root: false,
            permissions: Vec::new(),
        }
    }

    /// Replace the app secret, invalidating every token and signature made
    /// with the old one.
    pub fn rotate_secret(&mut self) {
        self.secret = generate_secret();
    }

    pub fn grant(&mut self, rule: PermissionRule) {
        self.permissions.push(rule);
    }
}

impl Entity for App {
    type Id = AppId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// A user of one app.
///
/// # Invariants
/// - Rotating `token_secret` invalidates every token previously issued for
///   this user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub app_id: AppId,
    /// Provider-qualified login, e.g. `fb:12345`.
    pub identifier: String,
    pub active: bool,
    pub is_admin: bool,
    pub token_secret: String,
    pub identity_provider: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl User {
    pub fn new(app_id: AppId, id: UserId, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let identity_provider = provider_of(&identifier).to_string();
        Self {
            id,
            app_id,
            identifier,
            active: true,
            is_admin: false,
            token_secret: generate_secret(),
            identity_provider,
            name: String::new(),
            email: String::new(),
            picture: String::new(),
            roles: Vec::new(),
        }
    }

    /// Revoke every token issued so far.
    pub fn rotate_token_secret(&mut self) {
        self.token_secret = generate_secret();
    }

    /// Assigned roles plus the implicit `user`/`admin` ones.
    pub fn effective_roles(&self) -> BTreeSet<Role> {
        let mut roles: BTreeSet<Role> = self.roles.iter().cloned().collect();
        roles.insert(Role::USER);
        if self.is_admin {
            roles.insert(Role::ADMIN);
        }
        roles
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Provider prefix of a qualified identifier (`fb:123` -> `fb`), or
/// `generic` for unqualified ones.
pub fn provider_of(identifier: &str) -> &str {
    match identifier.split_once(':') {
        Some((prefix, rest)) if !prefix.is_empty() && !rest.is_empty() => prefix,
        _ => "generic",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolved identity
// ─────────────────────────────────────────────────────────────────────────────

/// Who a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A signed request or a super token: the app itself.
    App(App),
    /// A user token, scoped to its app.
    User { app: App, user: User },
    /// No credentials; the app was named by the `Anonymous` scheme.
    Anonymous { app: App },
}

impl Identity {
    pub fn app(&self) -> &App {
        match self {
            Identity::App(app) | Identity::User { app, .. } | Identity::Anonymous { app } => app,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::User { user, .. } => Some(user),
            _ => None,
        }
    }

    /// Key used for throttling and CSRF bindings.
    pub fn key(&self) -> String {
        match self {
            Identity::App(app) => app.id.to_string(),
            Identity::User { user, .. } => user.id.to_string(),
            Identity::Anonymous { app } => format!("{}#anonymous", app.id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Identity::Anonymous { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_id() -> AppId {
        AppId::new("acme").unwrap()
    }

    #[test]
    fn rotating_secrets_changes_them() {
        let mut user = User::new(app_id(), UserId::new("u1").unwrap(), "fb:12345");
        let before = user.token_secret.clone();
        user.rotate_token_secret();
        assert_ne!(before, user.token_secret);
        assert_eq!(user.identity_provider, "fb");
    }

    #[test]
    fn unqualified_identifiers_use_generic_provider() {
        assert_eq!(provider_of("alice@example.com"), "generic");
        assert_eq!(provider_of("gh:42"), "gh");
        assert_eq!(provider_of(":42"), "generic");
    }

    #[test]
    fn write_methods_are_classified() {
        assert!(HttpMethod::Delete.is_write());
        assert!(HttpMethod::Patch.is_write());
        assert!(!HttpMethod::Get.is_write());
        assert!(!HttpMethod::Head.is_write());
        assert_eq!(HttpMethod::try_from(&http::Method::PUT).unwrap(), HttpMethod::Put);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn rule_subject_parses_wildcards() {
        let rule: PermissionRule = serde_json::from_str(
            r#"{"resource": "users/*", "subject": "self", "methods": ["GET", "PUT"]}"#,
        )
        .unwrap();
        assert_eq!(rule.subject, RuleSubject::Own);
        assert!(rule.applies_to_method(HttpMethod::Put));
        assert!(!rule.applies_to_method(HttpMethod::Delete));

        let any: RuleSubject = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(any, RuleSubject::Any);
        let one: RuleSubject = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(one, RuleSubject::Id(UserId::new("42").unwrap()));
    }

    #[test]
    fn admin_users_carry_admin_role() {
        let mut user = User::new(app_id(), UserId::new("u1").unwrap(), "alice");
        assert!(!user.effective_roles().contains(&Role::ADMIN));
        user.is_admin = true;
        assert!(user.effective_roles().contains(&Role::ADMIN));
    }
}
