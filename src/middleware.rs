//! Form access middleware for axum.
//!
//! [`FormAccessLayer`] resolves every request to a registered form and checks
//! the current user's permission for the action the request implies.
//! [`RequireFormPermissionLayer`] checks one fixed form and action for routes
//! whose form is known statically.
//!
//! # Fail-open policy
//!
//! The form lookup and permission check run inside a panic boundary. If that
//! part of the pipeline fails, the request is handled according to
//! [`PipelineErrorPolicy`], which defaults to [`PipelineErrorPolicy::Allow`]:
//! the request proceeds. A broken registry must not lock every user out of
//! every page. Registry store failures never reach this point; the cache
//! answers with stale or empty forms, and unknown forms follow
//! `default_allow`. Switching to [`PipelineErrorPolicy::Deny`] trades that
//! availability for strict enforcement.

use crate::action::FormAction;
use crate::context::{can_access, is_system_admin, ResolvedUserContext};
use crate::error::{
    unauthenticated_response, AccessDenied, AccessDeniedHandler, DefaultDeniedHandler,
    FormAccessError,
};
use crate::extractor::{ExtensionUserExtractor, UserContextExtractor};
use crate::form::{match_form, normalize_path};
use crate::registry::FormRegistryCache;

use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::{Method, Request};
use http_body::Body;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Route prefixes exempt from form checks by default: admin panel,
/// dashboard, auth routes, current-user API and notifications.
pub const DEFAULT_BYPASS: &[&str] = &[
    "/admin",
    "/dashboard",
    "/auth",
    "/api/me",
    "/api/notifications",
];

/// What to do when the access pipeline fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineErrorPolicy {
    /// Let the request through (fail open).
    #[default]
    Allow,
    /// Deny the request (fail closed).
    Deny,
}

/// Options for [`require_form_access`].
#[derive(Debug, Clone)]
pub struct FormAccessOptions {
    /// Path prefixes that skip form checks entirely.
    pub bypass: Vec<String>,
    /// Allow requests that match no registered form.
    pub default_allow: bool,
    /// Log every decision at `info` instead of `debug`.
    pub log_access: bool,
    /// Outcome when the pipeline fails.
    pub on_pipeline_error: PipelineErrorPolicy,
}

impl Default for FormAccessOptions {
    fn default() -> Self {
        Self {
            bypass: DEFAULT_BYPASS.iter().map(|p| p.to_string()).collect(),
            default_allow: true,
            log_access: false,
            on_pipeline_error: PipelineErrorPolicy::Allow,
        }
    }
}

impl FormAccessOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bypass list.
    pub fn bypass<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bypass = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Set the unknown-form policy.
    pub fn default_allow(mut self, allow: bool) -> Self {
        self.default_allow = allow;
        self
    }

    /// Enable or disable access logging.
    pub fn log_access(mut self, enabled: bool) -> Self {
        self.log_access = enabled;
        self
    }

    /// Set the pipeline error policy.
    pub fn on_pipeline_error(mut self, policy: PipelineErrorPolicy) -> Self {
        self.on_pipeline_error = policy;
        self
    }
}

/// Why a request was let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowReason {
    /// No user context; authentication is enforced elsewhere.
    NoUser,
    /// Path is on the bypass list.
    Bypass,
    /// System administrator, not impersonating.
    SystemAdmin,
    /// No registered form matched and `default_allow` is set.
    UnknownForm,
    /// The user holds the permission.
    Permitted {
        /// Matched form.
        form_code: String,
        /// Checked action.
        action: FormAction,
    },
    /// The pipeline failed and the policy is [`PipelineErrorPolicy::Allow`].
    PipelineError,
}

/// Outcome of an access check.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Continue to the handler.
    Allow(AllowReason),
    /// Respond with a denial.
    Deny(AccessDenied),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// The per-request decision procedure behind [`FormAccessLayer`].
///
/// `Start → BypassCheck → AdminCheck → LoadRegistry → Match → Classify →
/// PermissionCheck → Allow | Deny`
#[derive(Debug)]
pub struct FormAccessGuard {
    cache: Arc<FormRegistryCache>,
    options: FormAccessOptions,
    bypass: Vec<String>,
}

impl FormAccessGuard {
    /// Create a guard.
    pub fn new(cache: Arc<FormRegistryCache>, options: FormAccessOptions) -> Self {
        let bypass = options
            .bypass
            .iter()
            .filter_map(|prefix| {
                // Lowercase only: a trailing '/' is part of the prefix.
                if prefix.trim_end_matches('/').is_empty() {
                    tracing::warn!(
                        prefix = %prefix,
                        "Ignoring bypass prefix that matches every path"
                    );
                    None
                } else {
                    Some(prefix.to_ascii_lowercase())
                }
            })
            .collect();
        Self {
            cache,
            options,
            bypass,
        }
    }

    /// The registry cache.
    pub fn cache(&self) -> &Arc<FormRegistryCache> {
        &self.cache
    }

    /// The options.
    pub fn options(&self) -> &FormAccessOptions {
        &self.options
    }

    /// Decide whether `user` may make this request.
    pub async fn decide(
        &self,
        method: &Method,
        path: &str,
        user: Option<&ResolvedUserContext>,
    ) -> Decision {
        let decision = self.evaluate(method, path, user).await;
        self.log_decision(&decision, method, path, user);
        decision
    }

    async fn evaluate(
        &self,
        method: &Method,
        path: &str,
        user: Option<&ResolvedUserContext>,
    ) -> Decision {
        let Some(user) = user else {
            return Decision::Allow(AllowReason::NoUser);
        };

        let normalized = normalize_path(path);
        if self.bypass.iter().any(|prefix| normalized.starts_with(prefix.as_str())) {
            return Decision::Allow(AllowReason::Bypass);
        }

        if is_system_admin(user) {
            return Decision::Allow(AllowReason::SystemAdmin);
        }

        match AssertUnwindSafe(self.check_form(method, path, user))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(panic) => {
                let err = FormAccessError::Pipeline(panic_message(panic.as_ref()));
                self.on_pipeline_error(err, method, path, user)
            }
        }
    }

    async fn check_form(
        &self,
        method: &Method,
        path: &str,
        user: &ResolvedUserContext,
    ) -> Decision {
        let snapshot = self.cache.load().await;

        let Some(found) = match_form(path, snapshot.forms()) else {
            if self.options.default_allow {
                return Decision::Allow(AllowReason::UnknownForm);
            }
            let action = FormAction::classify(method, path);
            return Decision::Deny(AccessDenied::unknown_form(action, user.account(), path));
        };

        let form = &found.form.entry;
        let action = FormAction::classify(method, path);

        if can_access(user, &form.form_code, action) {
            Decision::Allow(AllowReason::Permitted {
                form_code: form.form_code.clone(),
                action,
            })
        } else {
            Decision::Deny(AccessDenied::new(
                &form.form_code,
                &form.form_name,
                action,
                user.account(),
                path,
            ))
        }
    }

    fn on_pipeline_error(
        &self,
        err: FormAccessError,
        method: &Method,
        path: &str,
        user: &ResolvedUserContext,
    ) -> Decision {
        tracing::error!(
            error = %err,
            policy = ?self.options.on_pipeline_error,
            user_id = %user.id,
            method = %method,
            path = %path,
            "Form access check failed"
        );
        match self.options.on_pipeline_error {
            PipelineErrorPolicy::Allow => Decision::Allow(AllowReason::PipelineError),
            PipelineErrorPolicy::Deny => {
                let action = FormAction::classify(method, path);
                Decision::Deny(
                    AccessDenied::unknown_form(action, user.account(), path)
                        .with_message("Access check failed"),
                )
            }
        }
    }

    fn log_decision(
        &self,
        decision: &Decision,
        method: &Method,
        path: &str,
        user: Option<&ResolvedUserContext>,
    ) {
        let user_id = user.map(|u| u.id.as_str()).unwrap_or("-");
        match decision {
            Decision::Allow(reason) if self.options.log_access => {
                tracing::info!(
                    user_id,
                    method = %method,
                    path,
                    reason = ?reason,
                    "Form access allowed"
                );
            }
            Decision::Allow(reason) => {
                tracing::trace!(
                    user_id,
                    method = %method,
                    path,
                    reason = ?reason,
                    "Form access allowed"
                );
            }
            Decision::Deny(denied) if self.options.log_access => {
                tracing::info!(
                    user_id,
                    method = %method,
                    path,
                    form_code = %denied.form_code,
                    action = %denied.required_action,
                    "Form access denied"
                );
            }
            Decision::Deny(denied) => {
                tracing::debug!(
                    user_id,
                    method = %method,
                    path,
                    form_code = %denied.form_code,
                    action = %denied.required_action,
                    "Form access denied"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic".to_string()
    }
}

/// Build the form access layer.
///
/// # Example
/// ```no_run
/// use axum::{Router, routing::get};
/// use axum_form_access::{
///     require_form_access, FormAccessOptions, FormRegistryCache, FormRegistryEntry,
///     StaticFormStore,
/// };
/// use std::sync::Arc;
///
/// let cache = Arc::new(FormRegistryCache::new(StaticFormStore::new(vec![
///     FormRegistryEntry::new("THEFT", "Theft Report", "/theft-report"),
/// ])));
///
/// let app: Router = Router::new()
///     .route("/theft-report", get(|| async { "reports" }))
///     .layer(require_form_access(FormAccessOptions::default(), cache));
/// ```
pub fn require_form_access(
    options: FormAccessOptions,
    cache: Arc<FormRegistryCache>,
) -> FormAccessLayer {
    FormAccessLayer::new(cache, options)
}

/// Build the static-route permission layer.
pub fn require_form_permission(
    form_code: impl Into<String>,
    action: FormAction,
) -> RequireFormPermissionLayer {
    RequireFormPermissionLayer::new(form_code, action)
}

/// A Tower layer enforcing form permissions on every request.
pub struct FormAccessLayer<U = ExtensionUserExtractor> {
    guard: Arc<FormAccessGuard>,
    extractor: Arc<U>,
    denied_handler: Arc<dyn AccessDeniedHandler>,
}

// Manual Clone impl to avoid requiring U: Clone (it's behind Arc)
impl<U> Clone for FormAccessLayer<U> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
            extractor: self.extractor.clone(),
            denied_handler: self.denied_handler.clone(),
        }
    }
}

impl FormAccessLayer<ExtensionUserExtractor> {
    /// Create a layer reading the user from request extensions, with the
    /// default denied handler.
    pub fn new(cache: Arc<FormRegistryCache>, options: FormAccessOptions) -> Self {
        Self {
            guard: Arc::new(FormAccessGuard::new(cache, options)),
            extractor: Arc::new(ExtensionUserExtractor),
            denied_handler: Arc::new(DefaultDeniedHandler::new()),
        }
    }
}

impl<U> FormAccessLayer<U> {
    /// Use a custom user extractor.
    pub fn with_user_extractor<U2>(self, extractor: U2) -> FormAccessLayer<U2> {
        FormAccessLayer {
            guard: self.guard,
            extractor: Arc::new(extractor),
            denied_handler: self.denied_handler,
        }
    }

    /// Set a custom denied handler.
    pub fn with_denied_handler(mut self, handler: impl AccessDeniedHandler + 'static) -> Self {
        self.denied_handler = Arc::new(handler);
        self
    }

    /// The decision procedure.
    pub fn guard(&self) -> &FormAccessGuard {
        &self.guard
    }

    /// Clear the registry cache, e.g. after an admin edited a form.
    pub fn clear_form_mappings_cache(&self) {
        self.guard.cache.invalidate();
    }
}

impl<S, U> Layer<S> for FormAccessLayer<U> {
    type Service = FormAccessMiddleware<S, U>;

    fn layer(&self, inner: S) -> Self::Service {
        FormAccessMiddleware {
            inner,
            layer: self.clone(),
        }
    }
}

/// The form access middleware service.
pub struct FormAccessMiddleware<S, U> {
    inner: S,
    layer: FormAccessLayer<U>,
}

impl<S: Clone, U> Clone for FormAccessMiddleware<S, U> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            layer: self.layer.clone(),
        }
    }
}

impl<S, U, ReqBody> Service<Request<ReqBody>> for FormAccessMiddleware<S, U>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    U: UserContextExtractor<ReqBody> + 'static,
    ReqBody: Body + Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let guard = self.layer.guard.clone();
        let denied_handler = self.layer.denied_handler.clone();
        let mut inner = self.inner.clone();

        let user = self.layer.extractor.extract_user(&request);
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        Box::pin(async move {
            match guard.decide(&method, &path, user.as_deref()).await {
                Decision::Allow(_) => inner.call(request).await,
                Decision::Deny(denied) => Ok(denied_handler.handle(&denied)),
            }
        })
    }
}

/// A Tower layer requiring one fixed form permission.
///
/// No URL matching and no bypass list. A system administrator who is not
/// impersonating passes. Without a user, API paths get `401` and pages are
/// redirected to the login route.
pub struct RequireFormPermissionLayer<U = ExtensionUserExtractor> {
    form_code: Arc<str>,
    action: FormAction,
    login_path: Arc<str>,
    extractor: Arc<U>,
    denied_handler: Arc<dyn AccessDeniedHandler>,
}

impl<U> Clone for RequireFormPermissionLayer<U> {
    fn clone(&self) -> Self {
        Self {
            form_code: self.form_code.clone(),
            action: self.action,
            login_path: self.login_path.clone(),
            extractor: self.extractor.clone(),
            denied_handler: self.denied_handler.clone(),
        }
    }
}

impl RequireFormPermissionLayer<ExtensionUserExtractor> {
    /// Require `action` on `form_code`.
    pub fn new(form_code: impl Into<String>, action: FormAction) -> Self {
        Self {
            form_code: Arc::from(form_code.into()),
            action,
            login_path: Arc::from("/login"),
            extractor: Arc::new(ExtensionUserExtractor),
            denied_handler: Arc::new(DefaultDeniedHandler::new()),
        }
    }
}

impl<U> RequireFormPermissionLayer<U> {
    /// Use a custom user extractor.
    pub fn with_user_extractor<U2>(self, extractor: U2) -> RequireFormPermissionLayer<U2> {
        RequireFormPermissionLayer {
            form_code: self.form_code,
            action: self.action,
            login_path: self.login_path,
            extractor: Arc::new(extractor),
            denied_handler: self.denied_handler,
        }
    }

    /// Set a custom denied handler.
    pub fn with_denied_handler(mut self, handler: impl AccessDeniedHandler + 'static) -> Self {
        self.denied_handler = Arc::new(handler);
        self
    }

    /// Set the login route unauthenticated page requests are sent to.
    pub fn with_login_path(mut self, login_path: impl Into<String>) -> Self {
        self.login_path = Arc::from(login_path.into());
        self
    }

    /// Decide for an already extracted user. `Ok(())` means allowed.
    pub fn check(&self, user: &ResolvedUserContext, path: &str) -> Result<(), AccessDenied> {
        if is_system_admin(user) || can_access(user, &self.form_code, self.action) {
            return Ok(());
        }
        Err(AccessDenied::new(
            self.form_code.as_ref(),
            self.form_code.as_ref(),
            self.action,
            user.account(),
            path,
        ))
    }
}

impl<S, U> Layer<S> for RequireFormPermissionLayer<U> {
    type Service = RequireFormPermissionMiddleware<S, U>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireFormPermissionMiddleware {
            inner,
            layer: self.clone(),
        }
    }
}

/// Service produced by [`RequireFormPermissionLayer`].
pub struct RequireFormPermissionMiddleware<S, U> {
    inner: S,
    layer: RequireFormPermissionLayer<U>,
}

impl<S: Clone, U> Clone for RequireFormPermissionMiddleware<S, U> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            layer: self.layer.clone(),
        }
    }
}

impl<S, U, ReqBody> Service<Request<ReqBody>> for RequireFormPermissionMiddleware<S, U>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    U: UserContextExtractor<ReqBody> + 'static,
    ReqBody: Body + Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let user = self.layer.extractor.extract_user(&request);
        let path = request.uri().path().to_string();

        let Some(user) = user else {
            let original_url = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| path.clone());
            tracing::debug!(path = %path, "Form permission requires an authenticated user");
            let response = unauthenticated_response(&original_url, &self.layer.login_path);
            return Box::pin(async move { Ok(response) });
        };

        match self.layer.check(&user, &path) {
            Ok(()) => {
                let mut inner = self.inner.clone();
                Box::pin(async move { inner.call(request).await })
            }
            Err(denied) => {
                tracing::info!(
                    user_id = %user.id,
                    path = %path,
                    form_code = %denied.form_code,
                    action = %denied.required_action,
                    "Form permission denied"
                );
                let response = self.layer.denied_handler.handle(&denied);
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
