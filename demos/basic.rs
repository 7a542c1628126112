//! Basic example demonstrating the form access middleware.
//!
//! Run with: `cargo run --example basic`
//!
//! Users are picked with an `X-User` header standing in for a real session.
//!
//! Test with:
//! ```sh
//! # Read-only grant on THEFT: viewing is allowed
//! curl -H "X-User: guard" http://localhost:3000/theft-report/12
//!
//! # ...editing through the API is denied with JSON
//! curl -X PUT -H "X-User: guard" http://localhost:3000/api/theft-report/12
//!
//! # ...deleting from a page is denied with an HTML page
//! curl -X POST -H "X-User: guard" http://localhost:3000/theft-report/12/delete
//!
//! # System Administrator passes everything
//! curl -X DELETE -H "X-User: admin" http://localhost:3000/theft-report/12
//!
//! # Static route without a user redirects to the login page
//! curl -i http://localhost:3000/incident/new
//!
//! # Register a new form and clear the cache
//! curl -X POST http://localhost:3000/admin/forms/incident
//! ```

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::Router;
use axum_form_access::{
    require_form_access, require_form_permission, FormAccessConfig, FormAccessLayer, FormAction,
    FormPermissions, FormRegistryEntry, InMemoryFormStore, InMemoryGrantStore, PermissionGrant,
    ResolveUserLayer, SessionIdentity, SYSTEM_ADMIN_ROLE,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG: &str = r#"
[settings]
default_allow = true
log_access = true
cache_ttl_secs = 300
fetch_timeout_ms = 2000

[[forms]]
FormCode = "THEFT"
FormName = "Theft Report"
ModuleName = "Security"
FormUrl = "/theft-report"

[[forms]]
FormCode = "THEFT_API"
FormName = "Theft Report API"
ModuleName = "Security"
FormUrl = "/api/theft-report"

[[forms]]
FormCode = "OHS"
FormName = "OHS Inspection"
ModuleName = "Inspections"
FormUrl = "/ohs-inspection"
"#;

#[derive(Clone)]
struct AdminState {
    forms: Arc<InMemoryFormStore>,
    access: FormAccessLayer,
}

// Handler functions
async fn page() -> &'static str {
    "Form page"
}

async fn register_incident_form(State(state): State<AdminState>) -> &'static str {
    let form =
        FormRegistryEntry::new("INCIDENT", "Incident Report", "/incident").module("Security");
    state.forms.upsert(form);
    state.access.clear_form_mappings_cache();
    "Registered INCIDENT, form cache cleared"
}

/// Stand-in for a login layer: maps `X-User` to a session identity.
async fn demo_session(mut request: Request, next: Next) -> Response {
    let identity = match request
        .headers()
        .get("x-user")
        .and_then(|v| v.to_str().ok())
    {
        Some("admin") => {
            Some(SessionIdentity::new("1", "admin@example.com").role(SYSTEM_ADMIN_ROLE))
        }
        Some("guard") => {
            Some(SessionIdentity::new("5", "guard@example.com").role("Security Guard"))
        }
        _ => None,
    };
    if let Some(identity) = identity {
        request.extensions_mut().insert(identity);
    }
    next.run(request).await
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axum_form_access=debug,basic=debug".into()),
        )
        .init();

    let config = FormAccessConfig::from_toml(CONFIG).expect("valid config");

    let forms = Arc::new(InMemoryFormStore::new(config.forms.clone()));
    let cache = Arc::new(config.cache(forms.clone()));

    let grants = InMemoryGrantStore::new();
    grants.grant(PermissionGrant::new("5", "THEFT", FormPermissions::read_only()));
    grants.grant(PermissionGrant::new("5", "THEFT_API", FormPermissions::read_only()));
    grants.grant(PermissionGrant::new("5", "OHS", FormPermissions::all()));

    tracing::info!(forms = config.forms.len(), "Form registry configured");

    let access = require_form_access(config.options(), cache)
        .with_denied_handler(config.denied_handler());

    let admin = Router::new()
        .route("/admin/forms/incident", post(register_incident_form))
        .with_state(AdminState {
            forms,
            access: access.clone(),
        });

    // Known form, checked without the registry
    let incident = Router::new()
        .route("/incident/new", get(page))
        .layer(require_form_permission("INCIDENT", FormAction::Create));

    let app = Router::new()
        .route("/theft-report", any(page))
        .route("/theft-report/{*rest}", any(page))
        .route("/api/theft-report/{*rest}", any(page))
        .route("/ohs-inspection", any(page))
        .route("/incident/{id}", get(page))
        .merge(admin)
        .layer(access)
        .merge(incident)
        .layer(ResolveUserLayer::new(grants))
        .layer(middleware::from_fn(demo_session));

    // Start the server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Test with:");
    tracing::info!("  curl -H 'X-User: guard' http://localhost:3000/theft-report/12");
    tracing::info!("  curl -X PUT -H 'X-User: guard' http://localhost:3000/api/theft-report/12");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
