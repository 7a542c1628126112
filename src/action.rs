//! Permission actions and their derivation from a request.

use http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The CRUD action a request needs permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormAction {
    /// Read access.
    View,
    /// Create new records.
    Create,
    /// Modify existing records.
    Edit,
    /// Remove records.
    Delete,
}

impl FormAction {
    /// All actions, in grant column order.
    pub const ALL: [FormAction; 4] = [Self::View, Self::Create, Self::Edit, Self::Delete];

    /// Lowercase action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }

    /// Derive the required action from the HTTP method and request path.
    ///
    /// Keywords in the path take priority over the method:
    /// - `/delete`, `/remove` → [`Delete`](Self::Delete)
    /// - `/edit`, `/update` → [`Edit`](Self::Edit)
    /// - `/new`, `/create`, `/add` → [`Create`](Self::Create)
    ///
    /// Otherwise `DELETE` → delete, `PUT`/`PATCH` → edit, `POST` → create and
    /// anything else → view.
    ///
    /// ```
    /// use axum_form_access::FormAction;
    /// use http::Method;
    ///
    /// assert_eq!(FormAction::classify(&Method::POST, "/forms/123/delete"), FormAction::Delete);
    /// assert_eq!(FormAction::classify(&Method::GET, "/forms/123"), FormAction::View);
    /// ```
    pub fn classify(method: &Method, path: &str) -> Self {
        Self::classify_str(method.as_str(), path)
    }

    /// Same as [`classify`](Self::classify) for a method given as a string.
    pub fn classify_str(method: &str, path: &str) -> Self {
        let path = path.to_ascii_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| path.contains(k));

        if has(&["/delete", "/remove"]) {
            return Self::Delete;
        }
        if has(&["/edit", "/update"]) {
            return Self::Edit;
        }
        if has(&["/new", "/create", "/add"]) {
            return Self::Create;
        }

        match method.to_ascii_uppercase().as_str() {
            "DELETE" => Self::Delete,
            "PUT" | "PATCH" => Self::Edit,
            "POST" => Self::Create,
            _ => Self::View,
        }
    }
}

impl fmt::Display for FormAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown action name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown form action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for FormAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Ok(Self::View),
            "create" => Ok(Self::Create),
            "edit" => Ok(Self::Edit),
            "delete" => Ok(Self::Delete),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}
