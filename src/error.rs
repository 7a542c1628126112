//! Error types and denial responses for the form access middleware.

use crate::action::FormAction;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use http::StatusCode;
use std::fmt;
use std::time::Duration;

/// Boxed error from a store implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Form code reported when a request matched no registered form.
pub const UNKNOWN_FORM_CODE: &str = "UNKNOWN";

/// Whether a path is an API route (JSON responses) rather than a page.
pub fn is_api_path(path: &str) -> bool {
    path.to_ascii_lowercase().contains("/api/")
}

/// Details of a denied request.
#[derive(Debug, Clone)]
pub struct AccessDenied {
    /// Code of the form the request resolved to.
    pub form_code: String,
    /// Display name of the form.
    pub form_name: String,
    /// Action the request needed.
    pub required_action: FormAction,
    /// Account of the user that was denied.
    pub account: String,
    /// Request path.
    pub path: String,
    /// Optional custom message.
    pub message: Option<String>,
}

impl AccessDenied {
    /// Create a denial for a known form.
    pub fn new(
        form_code: impl Into<String>,
        form_name: impl Into<String>,
        required_action: FormAction,
        account: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            form_code: form_code.into(),
            form_name: form_name.into(),
            required_action,
            account: account.into(),
            path: path.into(),
            message: None,
        }
    }

    /// Create a denial for a path that matched no registered form.
    pub fn unknown_form(
        required_action: FormAction,
        account: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::new(UNKNOWN_FORM_CODE, "Unknown Form", required_action, account, path)
            .with_message("Unknown Form")
    }

    /// Add a custom message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The message shown to the user.
    pub fn message(&self) -> String {
        match &self.message {
            Some(msg) => msg.clone(),
            None => format!(
                "You do not have '{}' permission on '{}'",
                self.required_action, self.form_name
            ),
        }
    }
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Access denied: {} on {} ({}) for {}",
            self.required_action, self.form_code, self.path, self.account
        )
    }
}

impl std::error::Error for AccessDenied {}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        DefaultDeniedHandler::new().handle(&self)
    }
}

/// Error type for form access operations.
#[derive(Debug, thiserror::Error)]
pub enum FormAccessError {
    /// A store (form registry or grants) failed.
    #[error("Store error: {0}")]
    Store(#[source] BoxError),

    /// The form registry fetch did not finish in time.
    #[error("Form registry fetch timed out after {0:?}")]
    StoreTimeout(Duration),

    /// The access pipeline failed unexpectedly.
    #[error("Access pipeline failed: {0}")]
    Pipeline(String),
}

impl FormAccessError {
    /// Wrap a store error.
    pub fn store(err: impl Into<BoxError>) -> Self {
        Self::Store(err.into())
    }
}

impl IntoResponse for FormAccessError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Store(_) | Self::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (
            status,
            Json(serde_json::json!({
                "success": false,
                "error": "Access check failed",
            })),
        )
            .into_response()
    }
}

/// Custom response handler for denied requests.
///
/// # Example
/// ```
/// use axum_form_access::{AccessDeniedHandler, AccessDenied};
/// use axum::response::{Response, IntoResponse};
/// use http::StatusCode;
///
/// struct PlainDeniedHandler;
///
/// impl AccessDeniedHandler for PlainDeniedHandler {
///     fn handle(&self, denied: &AccessDenied) -> Response {
///         (StatusCode::FORBIDDEN, denied.message()).into_response()
///     }
/// }
/// ```
pub trait AccessDeniedHandler: Send + Sync {
    /// Build the response for a denied request.
    fn handle(&self, denied: &AccessDenied) -> Response;
}

/// Responds with JSON on API paths and an HTML page everywhere else.
#[derive(Debug, Clone)]
pub struct DefaultDeniedHandler {
    home_path: String,
}

impl Default for DefaultDeniedHandler {
    fn default() -> Self {
        Self {
            home_path: "/dashboard".to_string(),
        }
    }
}

impl DefaultDeniedHandler {
    /// Create a handler linking back to `/dashboard`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the route the denial page links back to.
    pub fn with_home_path(mut self, home_path: impl Into<String>) -> Self {
        self.home_path = home_path.into();
        self
    }
}

impl AccessDeniedHandler for DefaultDeniedHandler {
    fn handle(&self, denied: &AccessDenied) -> Response {
        if is_api_path(&denied.path) {
            JsonDeniedHandler.handle(denied)
        } else {
            (
                StatusCode::FORBIDDEN,
                Html(denied_page(denied, &self.home_path)),
            )
                .into_response()
        }
    }
}

/// Always responds with the JSON denial payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDeniedHandler;

impl JsonDeniedHandler {
    /// Create a new JSON denied handler.
    pub fn new() -> Self {
        Self
    }
}

impl AccessDeniedHandler for JsonDeniedHandler {
    fn handle(&self, denied: &AccessDenied) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": "Access denied",
            "message": denied.message(),
            "formCode": denied.form_code,
            "requiredAction": denied.required_action.as_str(),
        });
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}

/// Response for a request with no authenticated user.
///
/// API paths get `401` JSON; pages are redirected to the login route with the
/// original URL as the `returnUrl` parameter.
pub fn unauthenticated_response(original_url: &str, login_path: &str) -> Response {
    if is_api_path(original_url) {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Unauthorized",
                "message": "Authentication required",
            })),
        )
            .into_response()
    } else {
        let location = format!(
            "{}?returnUrl={}",
            login_path,
            urlencoding::encode(original_url)
        );
        Redirect::to(&location).into_response()
    }
}

fn denied_page(denied: &AccessDenied, home_path: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Access Denied</title></head>
<body>
<main class="access-denied">
<h1>Access Denied</h1>
<p>{message}</p>
<dl>
<dt>Form</dt><dd>{form_name} ({form_code})</dd>
<dt>Required permission</dt><dd>{action}</dd>
<dt>Account</dt><dd>{account}</dd>
</dl>
<p>Contact your administrator to request access.</p>
<p><a href="{home}">Back to dashboard</a></p>
</main>
</body>
</html>"#,
        message = html_escape(&denied.message()),
        form_name = html_escape(&denied.form_name),
        form_code = html_escape(&denied.form_code),
        action = denied.required_action,
        account = html_escape(&denied.account),
        home = html_escape(home_path),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
