//! End-to-end flow over the public API: declare modules, author route and
//! schema files, build the router, and drive requests through the full
//! chain including the isolation middleware.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use routekit::runtime::runner::build_router;
use routekit::{
    handler_fn, register_module, HandlerFn, HandlerModule, ModuleRegistry, RequestContext,
    ShutdownController, DEFAULT_GRACE,
};
use serde_json::json;
use tower::ServiceExt;

struct EchoController;

impl HandlerModule for EchoController {
    fn handler(&self, name: &str) -> Option<HandlerFn> {
        match name {
            "greet" => Some(handler_fn(|ctx: RequestContext| async move {
                let name = ctx.params.get("name").cloned().unwrap_or_default();
                Ok((StatusCode::OK, format!("hello {name}")).into_response())
            })),
            "submit" => Some(handler_fn(|ctx: RequestContext| async move {
                Ok(axum::Json(json!({ "received": ctx.body })).into_response())
            })),
            "lookup" => Some(handler_fn(|ctx: RequestContext| async move {
                let id = ctx.query.get("id").cloned().unwrap_or_default();
                Ok((StatusCode::OK, format!("found {id}")).into_response())
            })),
            "fail" => Some(handler_fn(|_ctx| async {
                anyhow::bail!("database gone")
            })),
            "panic" => Some(handler_fn(|_ctx| async { panic!("handler panicked") })),
            _ => None,
        }
    }
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

register_module!(kind = Controller, source = "EchoController.rs", |_ctx| {
    Arc::new(EchoController)
});

const ROUTES: &str = r#"// test routes
{
    "config": { "status": "ACTIVE", "prefix": "/api" },
    "routes": [
        { "requestUri": "/greet/{name}", "handler": "Echo.greet" },
        {
            "requestUri": "/submit",
            "httpMethod": "post",
            "handler": "Echo.submit",
            "validatorSchema": "Submit"
        },
        {
            "requestUri": "/lookup",
            "handler": "Echo.lookup",
            "validatorSchema": "NumericId"
        },
        { "requestUri": "/fail", "handler": "Echo.fail" },
        { "requestUri": "/panic", "handler": "Echo.panic" }
    ]
}"#;

const NUMERIC_ID_SCHEMA: &str = r#"{
    "type": "object",
    "properties": {
        "query": {
            "type": "object",
            "properties": { "id": { "pattern": "^[0-9]+$" } },
            "required": ["id"]
        }
    }
}"#;

const SUBMIT_SCHEMA: &str = r#"{
    "type": "object",
    "properties": {
        "body": {
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        }
    }
}"#;

struct Harness {
    _dir: tempfile::TempDir,
    shutdown: ShutdownController,
    router: axum::Router,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let routes_dir = dir.path().join("routes");
    let schemas_dir = dir.path().join("schemas");
    std::fs::create_dir_all(&routes_dir).unwrap();
    std::fs::create_dir_all(&schemas_dir).unwrap();
    std::fs::write(routes_dir.join("echo.routes.json"), ROUTES).unwrap();
    std::fs::write(schemas_dir.join("Submit.json"), SUBMIT_SCHEMA).unwrap();
    std::fs::write(schemas_dir.join("NumericId.json"), NUMERIC_ID_SCHEMA).unwrap();

    let registry = ModuleRegistry::discover_and_build();
    let shutdown = ShutdownController::new(DEFAULT_GRACE);
    let router = build_router(
        &registry,
        &routes_dir,
        &schemas_dir,
        shutdown.clone(),
        1024 * 1024,
    );
    Harness {
        _dir: dir,
        shutdown,
        router,
    }
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn bound_route_serves_with_path_params() {
    let h = harness();
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/api/greet/ada")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "hello ada");
    assert!(!h.shutdown.is_fatal());
}

#[tokio::test]
async fn unbound_path_is_not_found() {
    let h = harness();
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/api/nowhere")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn valid_submission_passes_the_schema() {
    let h = harness();
    let response = h
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/submit")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"name":"ada"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(value["received"]["name"], "ada");
}

#[tokio::test]
async fn violating_submission_is_rejected() {
    let h = harness();
    let response = h
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/submit")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"age":3}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(value["error"], "Validation error.");
    assert!(!h.shutdown.is_fatal());
}

#[tokio::test]
async fn query_validation_gates_the_handler() {
    let h = harness();
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/lookup?id=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/api/lookup?id=42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "found 42");
}

#[tokio::test]
async fn handler_error_recovers_and_arms_shutdown() {
    let h = harness();
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/fail")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = body_text(response).await;
    assert_eq!(text, "Internal server error.");
    assert!(h.shutdown.is_fatal());
    assert!(h.shutdown.cancel_token().is_cancelled());
}

#[tokio::test]
async fn xhr_clients_get_a_json_error_shape() {
    let h = harness();
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/api/fail")
                .header("x-requested-with", "XMLHttpRequest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let value: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(value["error"], "Internal error occurred.");
}

#[tokio::test]
async fn handler_panic_is_contained_by_the_domain() {
    let h = harness();
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/api/panic")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    // No panic payload leaks to the client.
    assert!(!body_text(response).await.contains("handler panicked"));
    assert!(h.shutdown.is_fatal());
}

#[tokio::test]
async fn health_ping_answers_ok() {
    let h = harness();
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/sys/health/ping")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "Ok.");
}

#[tokio::test]
async fn routes_missing_from_disk_do_not_prevent_startup() {
    let registry = ModuleRegistry::discover_and_build();
    let shutdown = ShutdownController::new(DEFAULT_GRACE);
    let router = build_router(
        &registry,
        Path::new("/nonexistent/routes"),
        Path::new("/nonexistent/schemas"),
        shutdown,
        1024,
    );
    let response = router
        .oneshot(
            Request::builder()
                .uri("/sys/health/ping")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
