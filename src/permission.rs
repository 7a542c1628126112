//! Per-form CRUD permissions and the permission check.

use crate::action::FormAction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The four permission flags a user holds on one form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormPermissions {
    /// May view the form.
    pub can_view: bool,
    /// May create records.
    pub can_create: bool,
    /// May edit records.
    pub can_edit: bool,
    /// May delete records.
    pub can_delete: bool,
}

impl FormPermissions {
    /// No access.
    pub fn none() -> Self {
        Self::default()
    }

    /// Full CRUD access.
    pub fn all() -> Self {
        Self {
            can_view: true,
            can_create: true,
            can_edit: true,
            can_delete: true,
        }
    }

    /// View only.
    pub fn read_only() -> Self {
        Self {
            can_view: true,
            ..Self::default()
        }
    }

    /// Whether the flag for `action` is set.
    pub fn allows(&self, action: FormAction) -> bool {
        match action {
            FormAction::View => self.can_view,
            FormAction::Create => self.can_create,
            FormAction::Edit => self.can_edit,
            FormAction::Delete => self.can_delete,
        }
    }

    fn union(self, other: Self) -> Self {
        Self {
            can_view: self.can_view || other.can_view,
            can_create: self.can_create || other.can_create,
            can_edit: self.can_edit || other.can_edit,
            can_delete: self.can_delete || other.can_delete,
        }
    }
}

/// Permissions of one user keyed by `FormCode`.
pub type PermissionMap = HashMap<String, FormPermissions>;

/// One stored permission grant row: a user's flags on one form.
///
/// A missing row means no access to that form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PermissionGrant {
    /// Grantee.
    pub user_id: String,
    /// Form the grant applies to.
    pub form_code: String,
    /// View flag.
    #[serde(default)]
    pub can_view: bool,
    /// Create flag.
    #[serde(default)]
    pub can_create: bool,
    /// Edit flag.
    #[serde(default)]
    pub can_edit: bool,
    /// Delete flag.
    #[serde(default)]
    pub can_delete: bool,
}

impl PermissionGrant {
    /// Create a grant from a flag set.
    pub fn new(
        user_id: impl Into<String>,
        form_code: impl Into<String>,
        permissions: FormPermissions,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            form_code: form_code.into(),
            can_view: permissions.can_view,
            can_create: permissions.can_create,
            can_edit: permissions.can_edit,
            can_delete: permissions.can_delete,
        }
    }

    /// The flags of this grant.
    pub fn permissions(&self) -> FormPermissions {
        FormPermissions {
            can_view: self.can_view,
            can_create: self.can_create,
            can_edit: self.can_edit,
            can_delete: self.can_delete,
        }
    }
}

/// Collapse grant rows into a permission map.
///
/// The store holds at most one row per (user, form). Should a duplicate slip
/// through, the flags are combined and a warning is logged.
pub fn permissions_from_grants<'a>(
    grants: impl IntoIterator<Item = &'a PermissionGrant>,
) -> PermissionMap {
    let mut map = PermissionMap::new();
    for grant in grants {
        let flags = grant.permissions();
        match map.get_mut(&grant.form_code) {
            Some(existing) => {
                tracing::warn!(
                    user_id = %grant.user_id,
                    form_code = %grant.form_code,
                    "Duplicate permission grant, combining flags"
                );
                *existing = existing.union(flags);
            }
            None => {
                map.insert(grant.form_code.clone(), flags);
            }
        }
    }
    map
}

/// Check whether `permissions` allow `action` on `form_code`.
///
/// A form without an entry is denied.
///
/// ```
/// use axum_form_access::{check, FormAction, FormPermissions, PermissionMap};
///
/// let mut perms = PermissionMap::new();
/// perms.insert("X".to_string(), FormPermissions::read_only());
///
/// assert!(check(&perms, "X", FormAction::View));
/// assert!(!check(&perms, "X", FormAction::Edit));
/// assert!(!check(&PermissionMap::new(), "X", FormAction::View));
/// ```
pub fn check(permissions: &PermissionMap, form_code: &str, action: FormAction) -> bool {
    permissions
        .get(form_code)
        .is_some_and(|flags| flags.allows(action))
}

/// Like [`check`] with the action given by name. Unknown names are denied.
pub fn check_named(permissions: &PermissionMap, form_code: &str, action: &str) -> bool {
    match action.parse::<FormAction>() {
        Ok(action) => check(permissions, form_code, action),
        Err(_) => false,
    }
}
