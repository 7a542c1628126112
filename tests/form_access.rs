//! End-to-end tests running the layers inside an axum router.

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::routing::{any, get, post};
use axum::{Extension, Router};
use axum_form_access::{
    require_form_access, require_form_permission, FixedUserExtractor, FormAccessConfig,
    FormAccessError, FormAccessOptions, FormAction, FormPermissions, FormRegistryCache,
    FormRegistryEntry, FormRegistryStore, InMemoryFormStore, InMemoryGrantStore,
    JsonDeniedHandler, PermissionGrant, PipelineErrorPolicy, ResolveUserLayer,
    ResolvedUserContext, SessionIdentity, StaticFormStore, SYSTEM_ADMIN_ROLE,
};
use http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

fn forms() -> Vec<FormRegistryEntry> {
    vec![
        FormRegistryEntry::new("OHS", "OHS Inspection", "/ohs-inspection").module("Inspections"),
        FormRegistryEntry::new("OHS_SETTINGS", "OHS Settings", "/ohs-inspection/settings"),
        FormRegistryEntry::new("THEFT", "Theft Report", "/theft-report"),
        FormRegistryEntry::new("THEFT_API", "Theft Report API", "/api/theft-report"),
        FormRegistryEntry::new("SEC_LOG", "Security Log", "/security/*/log"),
    ]
}

fn cache() -> Arc<FormRegistryCache> {
    Arc::new(FormRegistryCache::new(StaticFormStore::new(forms())))
}

fn guard_user() -> ResolvedUserContext {
    ResolvedUserContext::builder("5", "guard@example.com")
        .role("Security Guard")
        .permission("THEFT", FormPermissions::read_only())
        .permission("THEFT_API", FormPermissions::read_only())
        .permission("OHS", FormPermissions::all())
        .build()
}

fn form_app(options: FormAccessOptions, cache: Arc<FormRegistryCache>) -> Router {
    Router::new()
        .route("/{*path}", any(|| async { "ok" }))
        .layer(require_form_access(options, cache))
}

fn with_user(router: Router, user: ResolvedUserContext) -> Router {
    router.layer(Extension(Arc::new(user)))
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_view_allowed_with_read_only_grant() {
    let app = with_user(form_app(FormAccessOptions::default(), cache()), guard_user());
    let response = app.oneshot(request("GET", "/theft-report/12")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

#[tokio::test]
async fn test_api_edit_denied_with_json_payload() {
    let app = with_user(form_app(FormAccessOptions::default(), cache()), guard_user());
    let response = app
        .oneshot(request("PUT", "/api/theft-report/12"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Access denied");
    assert_eq!(body["formCode"], "THEFT_API");
    assert_eq!(body["requiredAction"], "edit");
    assert!(body["message"].as_str().unwrap().contains("Theft Report API"));
}

#[tokio::test]
async fn test_page_delete_denied_with_html_page() {
    let app = with_user(form_app(FormAccessOptions::default(), cache()), guard_user());
    let response = app
        .oneshot(request("POST", "/theft-report/12/delete"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));

    let page = body_text(response).await;
    assert!(page.contains("Access Denied"));
    assert!(page.contains("Theft Report (THEFT)"));
    assert!(page.contains("guard@example.com"));
    assert!(page.contains("delete"));
}

#[tokio::test]
async fn test_longest_url_wins() {
    let app = with_user(form_app(FormAccessOptions::default(), cache()), guard_user());
    let response = app
        .clone()
        .oneshot(request("GET", "/ohs-inspection/42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("GET", "/ohs-inspection/settings/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_wildcard_form() {
    let app = with_user(form_app(FormAccessOptions::default(), cache()), guard_user());
    let response = app
        .oneshot(request("GET", "/security/gate-3/log"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_bypass_and_query_string() {
    let app = with_user(form_app(FormAccessOptions::default(), cache()), guard_user());
    let response = app
        .clone()
        .oneshot(request("DELETE", "/admin/forms/THEFT"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("GET", "/Theft-Report?tab=open"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_form_policy() {
    let response = with_user(form_app(FormAccessOptions::default(), cache()), guard_user())
        .oneshot(request("GET", "/reports/monthly"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let strict = FormAccessOptions::default().default_allow(false);
    let response = with_user(form_app(strict, cache()), guard_user())
        .oneshot(request("GET", "/api/reports/monthly"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["formCode"], "UNKNOWN");
    assert_eq!(body["message"], "Unknown Form");
}

#[tokio::test]
async fn test_no_user_passes_through() {
    let strict = FormAccessOptions::default().default_allow(false);
    let response = form_app(strict, cache())
        .oneshot(request("DELETE", "/theft-report/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_system_admin_and_impersonation() {
    let admin = ResolvedUserContext::builder("1", "admin@example.com")
        .role(SYSTEM_ADMIN_ROLE)
        .build();
    let response = with_user(form_app(FormAccessOptions::default(), cache()), admin)
        .oneshot(request("DELETE", "/theft-report/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let impersonating = ResolvedUserContext::builder("1", "admin@example.com")
        .role(SYSTEM_ADMIN_ROLE)
        .impersonating(true)
        .build();
    let response = with_user(form_app(FormAccessOptions::default(), cache()), impersonating)
        .oneshot(request("DELETE", "/theft-report/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

struct FailingStore;

#[async_trait]
impl FormRegistryStore for FailingStore {
    async fn list_active(&self) -> Result<Vec<FormRegistryEntry>, FormAccessError> {
        Err(FormAccessError::store("connection refused"))
    }
}

struct PanickingStore;

#[async_trait]
impl FormRegistryStore for PanickingStore {
    async fn list_active(&self) -> Result<Vec<FormRegistryEntry>, FormAccessError> {
        panic!("registry query exploded")
    }
}

#[tokio::test]
async fn test_store_failure_fails_open() {
    let cache = Arc::new(FormRegistryCache::new(FailingStore));
    let response = with_user(form_app(FormAccessOptions::default(), cache), guard_user())
        .oneshot(request("DELETE", "/theft-report/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_pipeline_panic_fails_open() {
    let cache = Arc::new(FormRegistryCache::new(PanickingStore));
    let response = with_user(form_app(FormAccessOptions::default(), cache), guard_user())
        .oneshot(request("DELETE", "/theft-report/1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_pipeline_panic_fails_closed_when_configured() {
    let cache = Arc::new(FormRegistryCache::new(PanickingStore));
    let options = FormAccessOptions::default().on_pipeline_error(PipelineErrorPolicy::Deny);
    let response = with_user(form_app(options, cache), guard_user())
        .oneshot(request("GET", "/api/theft-report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Access check failed");
}

#[tokio::test]
async fn test_cache_invalidation_picks_up_registry_edit() {
    let store = Arc::new(InMemoryFormStore::new(forms()));
    let cache = Arc::new(FormRegistryCache::from_arc(store.clone()));
    let layer = require_form_access(FormAccessOptions::default(), cache);
    let app = Router::new()
        .route("/{*path}", any(|| async { "ok" }))
        .layer(layer.clone())
        .layer(Extension(Arc::new(guard_user())));

    let response = app
        .clone()
        .oneshot(request("GET", "/incident/7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    store.upsert(FormRegistryEntry::new("INCIDENT", "Incident Report", "/incident"));

    // Still served from the cached snapshot.
    let response = app
        .clone()
        .oneshot(request("GET", "/incident/7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    layer.clear_form_mappings_cache();
    let response = app.oneshot(request("GET", "/incident/7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_custom_denied_handler() {
    let layer = require_form_access(FormAccessOptions::default(), cache())
        .with_denied_handler(JsonDeniedHandler::new());
    let app = Router::new()
        .route("/{*path}", any(|| async { "ok" }))
        .layer(layer)
        .layer(Extension(Arc::new(guard_user())));

    let response = app
        .oneshot(request("POST", "/theft-report/1/edit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["requiredAction"], "edit");
}

#[tokio::test]
async fn test_resolve_user_layer_feeds_access_check() {
    let grants = InMemoryGrantStore::new();
    grants.grant(PermissionGrant::new("5", "THEFT", FormPermissions::all()));

    let app = Router::new()
        .route("/{*path}", any(|| async { "ok" }))
        .layer(require_form_access(FormAccessOptions::default(), cache()))
        .layer(ResolveUserLayer::new(grants))
        .layer(Extension(SessionIdentity::new("5", "guard@example.com")));

    let response = app
        .clone()
        .oneshot(request("DELETE", "/theft-report/3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("GET", "/ohs-inspection"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

fn static_app() -> Router {
    Router::new()
        .route("/theft-report/new", get(|| async { "form" }))
        .route("/api/theft-report", post(|| async { "created" }))
        .layer(require_form_permission("THEFT", FormAction::Create).with_login_path("/signin"))
}

#[tokio::test]
async fn test_static_permission_unauthenticated() {
    let response = static_app()
        .oneshot(request("POST", "/api/theft-report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Unauthorized");

    let response = static_app()
        .oneshot(request("GET", "/theft-report/new?site=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()["location"],
        "/signin?returnUrl=%2Ftheft-report%2Fnew%3Fsite%3D2"
    );
}

#[tokio::test]
async fn test_static_permission_checks_grant() {
    let response = with_user(static_app(), guard_user())
        .oneshot(request("POST", "/api/theft-report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["formCode"], "THEFT");
    assert_eq!(body["requiredAction"], "create");

    let clerk = ResolvedUserContext::builder("8", "clerk@example.com")
        .permission("THEFT", FormPermissions::all())
        .build();
    let response = with_user(static_app(), clerk)
        .oneshot(request("POST", "/api/theft-report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "created");
}

#[tokio::test]
async fn test_fixed_user_extractor() {
    let layer = require_form_access(FormAccessOptions::default(), cache())
        .with_user_extractor(FixedUserExtractor::new(guard_user()));
    let app = Router::new()
        .route("/{*path}", any(|| async { "ok" }))
        .layer(layer);

    let response = app
        .clone()
        .oneshot(request("GET", "/theft-report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request("DELETE", "/theft-report/4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_configured_from_toml() {
    let config = FormAccessConfig::from_toml(
        r#"
[settings]
default_allow = false
home_path = "/home"
bypass = ["/health"]

[[forms]]
FormCode = "THEFT"
FormName = "Theft Report"
FormUrl = "/theft-report"
"#,
    )
    .unwrap();

    let cache = Arc::new(config.cache(config.static_store()));
    let layer = require_form_access(config.options(), cache)
        .with_denied_handler(config.denied_handler());
    let app = with_user(
        Router::new()
            .route("/{*path}", any(|| async { "ok" }))
            .layer(layer),
        guard_user(),
    );

    let response = app
        .clone()
        .oneshot(request("GET", "/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // "/dashboard" is not bypassed once the list is replaced.
    let response = app
        .clone()
        .oneshot(request("GET", "/dashboard"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(request("POST", "/theft-report/1/edit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains(r#"href="/home""#));
}
