//! The resolved user context an authorization decision is made for.
//!
//! A [`ResolvedUserContext`] is built once per authenticated request, from the
//! session identity and the user's permission grants, and is never changed
//! afterwards. Queries are plain functions over the context: [`has_role`],
//! [`can_access`] and [`is_system_admin`].

use crate::action::FormAction;
use crate::permission::{self, FormPermissions, PermissionMap};
use std::collections::BTreeSet;

/// Role that bypasses form permission checks unless impersonating.
pub const SYSTEM_ADMIN_ROLE: &str = "System Administrator";

/// An authenticated user with roles and per-form permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUserContext {
    /// User ID.
    pub id: String,
    /// Account email, shown on denial pages.
    pub email: String,
    /// Role names held by the session.
    pub role_names: BTreeSet<String>,
    /// Permissions keyed by form code.
    pub permissions: PermissionMap,
    /// An administrator is acting as this user.
    pub is_impersonating: bool,
}

impl ResolvedUserContext {
    /// Start building a context.
    pub fn builder(id: impl Into<String>, email: impl Into<String>) -> ResolvedUserContextBuilder {
        ResolvedUserContextBuilder {
            ctx: ResolvedUserContext {
                id: id.into(),
                email: email.into(),
                role_names: BTreeSet::new(),
                permissions: PermissionMap::new(),
                is_impersonating: false,
            },
        }
    }

    /// Account label for messages: the email, or the ID when no email is known.
    pub fn account(&self) -> &str {
        if self.email.is_empty() {
            &self.id
        } else {
            &self.email
        }
    }
}

/// Builder for [`ResolvedUserContext`].
#[derive(Debug, Clone)]
pub struct ResolvedUserContextBuilder {
    ctx: ResolvedUserContext,
}

impl ResolvedUserContextBuilder {
    /// Add a role.
    pub fn role(mut self, name: impl Into<String>) -> Self {
        self.ctx.role_names.insert(name.into());
        self
    }

    /// Add several roles.
    pub fn roles<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ctx.role_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set the permissions on one form.
    pub fn permission(mut self, form_code: impl Into<String>, flags: FormPermissions) -> Self {
        self.ctx.permissions.insert(form_code.into(), flags);
        self
    }

    /// Replace the permission map.
    pub fn permissions(mut self, permissions: PermissionMap) -> Self {
        self.ctx.permissions = permissions;
        self
    }

    /// Mark the session as impersonated.
    pub fn impersonating(mut self, is_impersonating: bool) -> Self {
        self.ctx.is_impersonating = is_impersonating;
        self
    }

    /// Finish the context.
    pub fn build(self) -> ResolvedUserContext {
        self.ctx
    }
}

/// Whether the user holds `role`.
pub fn has_role(ctx: &ResolvedUserContext, role: &str) -> bool {
    ctx.role_names.contains(role)
}

/// Whether the user may perform `action` on `form_code`.
pub fn can_access(ctx: &ResolvedUserContext, form_code: &str, action: FormAction) -> bool {
    permission::check(&ctx.permissions, form_code, action)
}

/// Whether the admin bypass applies.
///
/// Impersonation suppresses it: an impersonated session is held to the
/// impersonated user's own permissions.
pub fn is_system_admin(ctx: &ResolvedUserContext) -> bool {
    has_role(ctx, SYSTEM_ADMIN_ROLE) && !ctx.is_impersonating
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_helpers() {
        let ctx = ResolvedUserContext::builder("42", "guard@example.com")
            .roles(["Security Officer", "Inspector"])
            .permission("SEC_LOG", FormPermissions::read_only())
            .build();

        assert!(has_role(&ctx, "Inspector"));
        assert!(!has_role(&ctx, SYSTEM_ADMIN_ROLE));
        assert!(can_access(&ctx, "SEC_LOG", FormAction::View));
        assert!(!can_access(&ctx, "SEC_LOG", FormAction::Delete));
        assert!(!can_access(&ctx, "THEFT", FormAction::View));
        assert_eq!(ctx.account(), "guard@example.com");
    }

    #[test]
    fn test_impersonation_suppresses_admin() {
        let admin = ResolvedUserContext::builder("1", "admin@example.com")
            .role(SYSTEM_ADMIN_ROLE)
            .build();
        assert!(is_system_admin(&admin));

        let impersonating = ResolvedUserContext::builder("1", "admin@example.com")
            .role(SYSTEM_ADMIN_ROLE)
            .impersonating(true)
            .build();
        assert!(!is_system_admin(&impersonating));
        assert!(has_role(&impersonating, SYSTEM_ADMIN_ROLE));
    }

    #[test]
    fn test_account_falls_back_to_id() {
        let ctx = ResolvedUserContext::builder("emp-9", "").build();
        assert_eq!(ctx.account(), "emp-9");
    }
}
