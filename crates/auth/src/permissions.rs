//! Resource permission evaluation.
//!
//! Order of checks for one request:
//! 1. app state (inactive, read-only),
//! 2. protected paths,
//! 3. the cross-app guard,
//! 4. the app's ordered permission rules (users and guests only).

use tollgate_core::AppId;

use crate::protected::{normalize_path, path_matches};
use crate::{App, AuthError, HttpMethod, Identity, PermissionRule, ProtectedPath, RuleSubject, User};

/// Permission introspection is always readable.
const PERMISSIONS_PATH: &str = "_permissions/*";
/// First path segment under which app records live.
const APPS_SEGMENT: &str = "apps";

#[derive(Debug, Clone, Default)]
pub struct PermissionEvaluator {
    protected_paths: Vec<ProtectedPath>,
}

impl PermissionEvaluator {
    pub fn new(protected_paths: Vec<ProtectedPath>) -> Self {
        Self { protected_paths }
    }

    /// Gate applied before any rule: inactive apps refuse everything,
    /// read-only apps refuse writes.
    pub fn check_app_state(app: &App, method: HttpMethod) -> Result<(), AuthError> {
        if !app.active {
            return Err(AuthError::TenantInactive);
        }
        if app.read_only && method.is_write() {
            return Err(AuthError::TenantReadOnly);
        }
        Ok(())
    }

    /// Rule evaluation for a user (`Some`) or the empty subject (`None`).
    ///
    /// Admins always pass; `GET _permissions/*` always passes; otherwise the
    /// first matching rule allows and no match denies.
    pub fn is_allowed(&self, app: &App, user: Option<&User>, resource_path: &str, method: HttpMethod) -> bool {
        if user.is_some_and(|u| u.is_admin) {
            return true;
        }
        if method == HttpMethod::Get && path_matches(PERMISSIONS_PATH, resource_path) {
            return true;
        }
        app.permissions
            .iter()
            .any(|rule| rule_matches(rule, user, resource_path, method))
    }

    /// Full decision for a resolved identity.
    pub fn authorize(&self, identity: &Identity, resource_path: &str, method: HttpMethod) -> Result<(), AuthError> {
        let app = identity.app();
        Self::check_app_state(app, method)?;

        if let Some(rule) = self
            .protected_paths
            .iter()
            .find(|p| p.matches(resource_path, method) && !p.permits(identity))
        {
            tracing::debug!(path = resource_path, patterns = ?rule.patterns, "protected path refused identity");
            return Err(AuthError::PermissionDenied);
        }

        let root_app = matches!(identity, Identity::App(app) if app.is_root);
        if !root_app && targets_other_app(&app.id, resource_path) {
            tracing::debug!(app_id = %app.id, path = resource_path, "cross-app access refused");
            return Err(AuthError::PermissionDenied);
        }

        let allowed = match identity {
            Identity::App(_) => true,
            Identity::User { user, .. } => self.is_allowed(app, Some(user), resource_path, method),
            Identity::Anonymous { .. } => self.is_allowed(app, None, resource_path, method),
        };
        if allowed {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied)
        }
    }
}

fn rule_matches(rule: &PermissionRule, user: Option<&User>, resource_path: &str, method: HttpMethod) -> bool {
    if !rule.applies_to_method(method) || !path_matches(&rule.resource, resource_path) {
        return false;
    }
    match (&rule.subject, user) {
        (RuleSubject::Any, Some(_)) => true,
        (RuleSubject::Any, None) => rule.allow_guests,
        (RuleSubject::Own, Some(user)) => normalize_path(resource_path)
            .split('/')
            .any(|segment| segment == user.id.as_str()),
        (RuleSubject::Id(id), Some(user)) => id == &user.id,
        (RuleSubject::Own | RuleSubject::Id(_), None) => false,
    }
}

/// `apps` or `apps/<id>` where `<id>` is not `own`.
fn targets_other_app(own: &AppId, resource_path: &str) -> bool {
    let mut segments = normalize_path(resource_path).split('/');
    if segments.next() != Some(APPS_SEGMENT) {
        return false;
    }
    match segments.next() {
        Some(target) => AppId::new(target).map_or(true, |target| &target != own),
        None => true,
    }
}
