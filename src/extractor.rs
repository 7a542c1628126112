//! User context extraction from HTTP requests.
//!
//! The access middleware does not authenticate. It reads the
//! [`ResolvedUserContext`] an earlier layer attached to the request through a
//! [`UserContextExtractor`]. The default, [`ExtensionUserExtractor`], reads
//! an `Arc<ResolvedUserContext>` from the request extensions, which is what
//! [`ResolveUserLayer`](crate::ResolveUserLayer) inserts.
//!
//! Implement the trait to take the context from somewhere else:
//!
//! ```
//! use axum_form_access::{ResolvedUserContext, UserContextExtractor};
//! use http::Request;
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct Session {
//!     user: Arc<ResolvedUserContext>,
//! }
//!
//! struct SessionExtractor;
//!
//! impl<B> UserContextExtractor<B> for SessionExtractor {
//!     fn extract_user(&self, request: &Request<B>) -> Option<Arc<ResolvedUserContext>> {
//!         request.extensions().get::<Session>().map(|s| s.user.clone())
//!     }
//! }
//! ```

use crate::context::ResolvedUserContext;
use http::Request;
use std::sync::Arc;

/// Trait for obtaining the current user from a request.
///
/// Synchronous: the context is resolved before this middleware runs.
/// `None` means no authenticated user.
pub trait UserContextExtractor<B>: Send + Sync {
    /// Extract the resolved user context.
    fn extract_user(&self, request: &Request<B>) -> Option<Arc<ResolvedUserContext>>;
}

impl<B, T: UserContextExtractor<B>> UserContextExtractor<B> for Arc<T> {
    fn extract_user(&self, request: &Request<B>) -> Option<Arc<ResolvedUserContext>> {
        (**self).extract_user(request)
    }
}

impl<B, T: UserContextExtractor<B> + ?Sized> UserContextExtractor<B> for Box<T> {
    fn extract_user(&self, request: &Request<B>) -> Option<Arc<ResolvedUserContext>> {
        (**self).extract_user(request)
    }
}

/// Reads `Arc<ResolvedUserContext>` from the request extensions.
#[derive(Debug, Clone, Default)]
pub struct ExtensionUserExtractor;

impl ExtensionUserExtractor {
    /// Create a new extension extractor.
    pub fn new() -> Self {
        Self
    }
}

impl<B> UserContextExtractor<B> for ExtensionUserExtractor {
    fn extract_user(&self, request: &Request<B>) -> Option<Arc<ResolvedUserContext>> {
        request.extensions().get::<Arc<ResolvedUserContext>>().cloned()
    }
}

/// Always returns the same user, or nobody.
///
/// Useful for testing.
#[derive(Debug, Clone, Default)]
pub struct FixedUserExtractor {
    user: Option<Arc<ResolvedUserContext>>,
}

impl FixedUserExtractor {
    /// Always extract `user`.
    pub fn new(user: ResolvedUserContext) -> Self {
        Self {
            user: Some(Arc::new(user)),
        }
    }

    /// Never extract a user.
    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

impl<B> UserContextExtractor<B> for FixedUserExtractor {
    fn extract_user(&self, _request: &Request<B>) -> Option<Arc<ResolvedUserContext>> {
        self.user.clone()
    }
}
