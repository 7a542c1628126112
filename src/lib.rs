//! # axum-form-access
//!
//! Form-level access control middleware for [axum](https://docs.rs/axum).
//!
//! Every request path is resolved to a registered *form* (an application
//! screen identified by a `FormCode` and mapped by a `FormUrl`). The request
//! method and path decide which of the four actions it needs (`view`,
//! `create`, `edit`, `delete`), and the authenticated user's per-form grants
//! decide whether it may proceed.
//!
//! ## Features
//!
//! - **Form registry cache**: forms are loaded from a [`FormRegistryStore`]
//!   and cached for five minutes; [`clear_form_mappings_cache`] forces a
//!   reload after an admin edit
//! - **URL matching**: exact, segment prefix, loose prefix and `*` wildcard
//!   patterns, most specific (longest) URL first
//! - **Action classification**: from path markers such as `/new` and `/edit`,
//!   falling back to the HTTP method
//! - **Bypass and admin shortcuts**: configurable path prefixes skip checks,
//!   a System Administrator who is not impersonating passes everything
//! - **Fail open**: registry outages and pipeline failures let requests
//!   through unless configured otherwise
//! - **Denial responses**: JSON for `/api/` paths and an HTML page elsewhere
//!
//! ## Quick Start
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use axum_form_access::{
//!     require_form_access, FormAccessOptions, FormRegistryCache, FormRegistryEntry,
//!     InMemoryGrantStore, PermissionGrant, FormPermissions, ResolveUserLayer,
//!     StaticFormStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let forms = StaticFormStore::new(vec![
//!         FormRegistryEntry::new("THEFT", "Theft Report", "/theft-report"),
//!         FormRegistryEntry::new("OHS", "OHS Inspection", "/ohs-inspection"),
//!     ]);
//!     let cache = Arc::new(FormRegistryCache::new(forms));
//!
//!     let grants = InMemoryGrantStore::new();
//!     grants.grant(PermissionGrant::new("5", "THEFT", FormPermissions::read_only()));
//!
//!     // The login layer (not shown) inserts a `SessionIdentity`;
//!     // `ResolveUserLayer` turns it into a `ResolvedUserContext`.
//!     let app = Router::new()
//!         .route("/theft-report", get(|| async { "reports" }))
//!         .layer(require_form_access(FormAccessOptions::default(), cache))
//!         .layer(ResolveUserLayer::new(grants));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Action Classification
//!
//! Path markers are checked first, for any method:
//!
//! | Path contains | Action |
//! |---------------|--------|
//! | `/delete`, `/remove` | `delete` |
//! | `/edit`, `/update` | `edit` |
//! | `/new`, `/create`, `/add` | `create` |
//!
//! Otherwise the method decides: `DELETE` is `delete`, `PUT` and `PATCH` are
//! `edit`, `POST` is `create` and everything else is `view`.
//!
//! ## Static Routes
//!
//! When a route's form is known up front, skip the registry entirely:
//!
//! ```no_run
//! use axum::{Router, routing::post};
//! use axum_form_access::{require_form_permission, FormAction};
//!
//! let app: Router = Router::new()
//!     .route("/api/theft-report", post(|| async { "created" }))
//!     .layer(require_form_permission("THEFT", FormAction::Create));
//! ```
//!
//! ## Custom Denied Response
//!
//! ```
//! use axum_form_access::{
//!     require_form_access, AccessDenied, AccessDeniedHandler, FormAccessOptions,
//!     FormRegistryCache, JsonDeniedHandler, StaticFormStore,
//! };
//! use axum::response::{IntoResponse, Response};
//! use http::StatusCode;
//! use std::sync::Arc;
//!
//! let cache = Arc::new(FormRegistryCache::new(StaticFormStore::new(vec![])));
//!
//! // JSON everywhere, pages included
//! let layer = require_form_access(FormAccessOptions::default(), cache.clone())
//!     .with_denied_handler(JsonDeniedHandler::new());
//!
//! // Or implement your own
//! struct TeapotHandler;
//!
//! impl AccessDeniedHandler for TeapotHandler {
//!     fn handle(&self, denied: &AccessDenied) -> Response {
//!         (StatusCode::IM_A_TEAPOT, denied.message()).into_response()
//!     }
//! }
//!
//! let layer = require_form_access(FormAccessOptions::default(), cache)
//!     .with_denied_handler(TeapotHandler);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod action;
mod config;
mod context;
mod error;
mod extractor;
mod form;
mod middleware;
mod permission;
mod registry;
mod session;

// Re-export main types
pub use action::{FormAction, UnknownAction};
pub use config::{ConfigError, FormAccessConfig, FormAccessSettings};
pub use context::{
    can_access, has_role, is_system_admin, ResolvedUserContext, ResolvedUserContextBuilder,
    SYSTEM_ADMIN_ROLE,
};
pub use error::{
    is_api_path, unauthenticated_response, AccessDenied, AccessDeniedHandler, BoxError,
    DefaultDeniedHandler, FormAccessError, JsonDeniedHandler, UNKNOWN_FORM_CODE,
};
pub use extractor::{ExtensionUserExtractor, FixedUserExtractor, UserContextExtractor};
pub use form::{
    match_form, normalize_path, CompiledForm, FormMatch, FormRegistryEntry, MatchKind, UrlPattern,
};
pub use middleware::{
    require_form_access, require_form_permission, AllowReason, Decision, FormAccessGuard,
    FormAccessLayer, FormAccessMiddleware, FormAccessOptions, PipelineErrorPolicy,
    RequireFormPermissionLayer, RequireFormPermissionMiddleware, DEFAULT_BYPASS,
};
pub use permission::{
    check, check_named, permissions_from_grants, FormPermissions, PermissionGrant, PermissionMap,
};
pub use registry::{
    clear_form_mappings_cache, Clock, FormRegistryCache, FormRegistryStore, FormSnapshot,
    InMemoryFormStore, ManualClock, StaticFormStore, SystemClock, DEFAULT_CACHE_TTL,
};
pub use session::{
    load_user_context, resolve_user_context, GrantStore, InMemoryGrantStore, ResolveUserLayer,
    ResolveUserMiddleware, SessionIdentity,
};

/// Prelude module for convenient imports.
///
/// ```
/// use axum_form_access::prelude::*;
/// ```
pub mod prelude {
    pub use crate::action::FormAction;
    pub use crate::config::{ConfigError, FormAccessConfig};
    pub use crate::context::{can_access, has_role, is_system_admin, ResolvedUserContext};
    pub use crate::error::{AccessDenied, AccessDeniedHandler, FormAccessError};
    pub use crate::extractor::UserContextExtractor;
    pub use crate::form::FormRegistryEntry;
    pub use crate::middleware::{
        require_form_access, require_form_permission, FormAccessLayer, FormAccessOptions,
    };
    pub use crate::permission::{FormPermissions, PermissionGrant};
    pub use crate::registry::{clear_form_mappings_cache, FormRegistryCache, FormRegistryStore};
    pub use crate::session::{GrantStore, ResolveUserLayer, SessionIdentity};
}
