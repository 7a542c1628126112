//! Resolving the session user into a [`ResolvedUserContext`].
//!
//! The login layer places a [`SessionIdentity`] in the request extensions.
//! [`ResolveUserLayer`] loads that user's permission grants from a
//! [`GrantStore`], builds the context once and inserts it as
//! `Arc<ResolvedUserContext>` for the access middleware and the handlers.

use crate::context::ResolvedUserContext;
use crate::error::FormAccessError;
use crate::permission::{permissions_from_grants, PermissionGrant};

use async_trait::async_trait;
use axum::response::Response;
use futures_util::future::BoxFuture;
use http::Request;
use http_body::Body;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// The authenticated identity carried by the session.
///
/// When an administrator impersonates a user, `user_id` and `email` are the
/// impersonated user's and `is_impersonating` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// User ID.
    pub user_id: String,
    /// Account email.
    pub email: String,
    /// Role names.
    pub role_names: BTreeSet<String>,
    /// An administrator is acting as this user.
    pub is_impersonating: bool,
}

impl SessionIdentity {
    /// Create an identity without roles.
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            role_names: BTreeSet::new(),
            is_impersonating: false,
        }
    }

    /// Add a role.
    pub fn role(mut self, name: impl Into<String>) -> Self {
        self.role_names.insert(name.into());
        self
    }

    /// Mark as impersonated.
    pub fn impersonating(mut self, is_impersonating: bool) -> Self {
        self.is_impersonating = is_impersonating;
        self
    }
}

/// Source of permission grants.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// All grant rows for one user.
    async fn grants_for(&self, user_id: &str) -> Result<Vec<PermissionGrant>, FormAccessError>;
}

#[async_trait]
impl<T: GrantStore + ?Sized> GrantStore for Arc<T> {
    async fn grants_for(&self, user_id: &str) -> Result<Vec<PermissionGrant>, FormAccessError> {
        (**self).grants_for(user_id).await
    }
}

/// A mutable in-process grant store.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    grants: RwLock<HashMap<String, Vec<PermissionGrant>>>,
}

impl InMemoryGrantStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the grant for (user, form).
    pub fn grant(&self, grant: PermissionGrant) {
        let mut grants = self.grants.write();
        let rows = grants.entry(grant.user_id.clone()).or_default();
        match rows.iter_mut().find(|g| g.form_code == grant.form_code) {
            Some(existing) => *existing = grant,
            None => rows.push(grant),
        }
    }

    /// Remove the grant for (user, form).
    pub fn revoke(&self, user_id: &str, form_code: &str) {
        if let Some(rows) = self.grants.write().get_mut(user_id) {
            rows.retain(|g| g.form_code != form_code);
        }
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn grants_for(&self, user_id: &str) -> Result<Vec<PermissionGrant>, FormAccessError> {
        Ok(self.grants.read().get(user_id).cloned().unwrap_or_default())
    }
}

/// Build the context for `identity` from its grant rows.
///
/// Rows for other users are ignored.
pub fn resolve_user_context(
    identity: &SessionIdentity,
    grants: &[PermissionGrant],
) -> ResolvedUserContext {
    let own = grants.iter().filter(|g| g.user_id == identity.user_id);
    ResolvedUserContext::builder(&identity.user_id, &identity.email)
        .roles(identity.role_names.iter().cloned())
        .permissions(permissions_from_grants(own))
        .impersonating(identity.is_impersonating)
        .build()
}

/// Load grants and resolve the context.
///
/// A failing grant store does not fail the request: the user is resolved
/// without permissions, which the permission check treats as no access.
pub async fn load_user_context(
    store: &dyn GrantStore,
    identity: &SessionIdentity,
) -> ResolvedUserContext {
    match store.grants_for(&identity.user_id).await {
        Ok(grants) => resolve_user_context(identity, &grants),
        Err(err) => {
            tracing::error!(
                error = %err,
                user_id = %identity.user_id,
                "Failed to load permission grants"
            );
            resolve_user_context(identity, &[])
        }
    }
}

/// A Tower layer that turns a [`SessionIdentity`] into a [`ResolvedUserContext`].
#[derive(Clone)]
pub struct ResolveUserLayer {
    store: Arc<dyn GrantStore>,
}

impl ResolveUserLayer {
    /// Create the layer.
    pub fn new(store: impl GrantStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Create the layer over a shared store.
    pub fn from_arc(store: Arc<dyn GrantStore>) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for ResolveUserLayer {
    type Service = ResolveUserMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResolveUserMiddleware {
            inner,
            store: self.store.clone(),
        }
    }
}

/// Service produced by [`ResolveUserLayer`].
#[derive(Clone)]
pub struct ResolveUserMiddleware<S> {
    inner: S,
    store: Arc<dyn GrantStore>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for ResolveUserMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Body + Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let store = self.store.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let identity = request.extensions().get::<SessionIdentity>().cloned();
            if let Some(identity) = identity {
                let ctx = load_user_context(store.as_ref(), &identity).await;
                tracing::trace!(
                    user_id = %ctx.id,
                    forms = ctx.permissions.len(),
                    impersonating = ctx.is_impersonating,
                    "Resolved user context"
                );
                request.extensions_mut().insert(Arc::new(ctx));
            }
            inner.call(request).await
        })
    }
}
