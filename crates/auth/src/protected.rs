//! Path globs and protected-path rules.

use std::collections::BTreeSet;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::{HttpMethod, Identity, Role};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Strip leading/trailing slashes so `/users/*` and `users/*` are the same.
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Glob match of a resource path.
///
/// `*` matches within one segment, `**` across segments; a bare `*` or `**`
/// pattern matches every path. Invalid patterns never match.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern = normalize_path(pattern);
    if pattern == "*" || pattern == "**" {
        return true;
    }
    match Pattern::new(pattern) {
        Ok(compiled) => compiled.matches_with(normalize_path(path), MATCH_OPTIONS),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "ignoring invalid path pattern");
            false
        }
    }
}

/// A rule that locks matching paths behind roles (users) or app traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPath {
    pub patterns: Vec<String>,
    /// Any one of these suffices. Empty = any authenticated user.
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    /// Methods this rule applies to. Empty = all.
    #[serde(default)]
    pub methods: BTreeSet<HttpMethod>,
    /// Only app-signed traffic (or super tokens) may pass.
    #[serde(default)]
    pub is_app_rule: bool,
}

impl ProtectedPath {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            roles: BTreeSet::new(),
            methods: BTreeSet::new(),
            is_app_rule: false,
        }
    }

    pub fn roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn app_only(mut self) -> Self {
        self.is_app_rule = true;
        self
    }

    pub fn matches(&self, path: &str, method: HttpMethod) -> bool {
        (self.methods.is_empty() || self.methods.contains(&method))
            && self.patterns.iter().any(|p| path_matches(p, path))
    }

    pub fn permits(&self, identity: &Identity) -> bool {
        match identity {
            Identity::App(_) => true,
            Identity::Anonymous { .. } => false,
            Identity::User { .. } if self.is_app_rule => false,
            Identity::User { user, .. } => {
                self.roles.is_empty() || user.effective_roles().iter().any(|r| self.roles.contains(r))
            }
        }
    }
}
