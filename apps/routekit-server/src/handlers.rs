//! Demo handler modules wired up through the suffix convention.
//!
//! The declared source paths decide the canonical names the route files
//! refer to: `UserController.rs` → `/User`, referenced as `User.method`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use routekit::{
    handler_fn, register_module, HandlerFn, HandlerModule, Initializable, Interceptor,
    InterceptorFlow, RequestContext,
};
use serde_json::json;

/// In-memory user store backing the demo controller.
pub struct UserService {
    users: Mutex<BTreeMap<u64, serde_json::Value>>,
    next_id: Mutex<u64>,
}

impl UserService {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(BTreeMap::new()),
            next_id: Mutex::new(1),
        }
    }

    pub fn all(&self) -> Vec<serde_json::Value> {
        self.users.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<serde_json::Value> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    pub fn create(&self, mut user: serde_json::Value) -> serde_json::Value {
        let mut next = self.next_id.lock().unwrap();
        let id = *next;
        *next += 1;
        user["id"] = json!(id);
        self.users.lock().unwrap().insert(id, user.clone());
        user
    }
}

impl HandlerModule for UserService {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

register_module!(kind = Service, source = "UserService.rs", |_ctx| {
    Arc::new(UserService::new())
});

/// Controller for the /api/users routes. The backing service is resolved
/// from the construction context, so other consumers of `/User` observe the
/// same store.
pub struct UserController {
    service: Arc<UserService>,
}

impl UserController {
    fn new(service: Arc<UserService>) -> Self {
        Self { service }
    }
}

impl Initializable for UserController {
    fn init(&self) -> anyhow::Result<()> {
        tracing::info!("user controller ready");
        Ok(())
    }
}

impl HandlerModule for UserController {
    fn handler(&self, name: &str) -> Option<HandlerFn> {
        match name {
            "fetch_all" => {
                let service = self.service.clone();
                Some(handler_fn(move |_ctx| {
                    let service = service.clone();
                    async move { Ok(Json(service.all()).into_response()) }
                }))
            }
            "fetch_one" => {
                let service = self.service.clone();
                Some(handler_fn(move |ctx: RequestContext| {
                    let service = service.clone();
                    async move {
                        let id: u64 = ctx
                            .params
                            .get("id")
                            .and_then(|raw| raw.parse().ok())
                            .unwrap_or(0);
                        match service.get(id) {
                            Some(user) => Ok(Json(user).into_response()),
                            None => Ok(
                                (StatusCode::NOT_FOUND, Json(json!({ "error": "No such user." })))
                                    .into_response(),
                            ),
                        }
                    }
                }))
            }
            "create" => {
                let service = self.service.clone();
                Some(handler_fn(move |ctx: RequestContext| {
                    let service = service.clone();
                    async move {
                        let user = service.create(ctx.body.clone());
                        Ok((StatusCode::CREATED, Json(user)).into_response())
                    }
                }))
            }
            // Deliberately broken endpoint for demonstrating fault
            // isolation; see the route file comment.
            "explode" => Some(handler_fn(|_ctx| async {
                anyhow::bail!("simulated unrecoverable failure")
            })),
            _ => None,
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }

    fn as_initializable(&self) -> Option<&dyn Initializable> {
        Some(self)
    }
}

register_module!(kind = Controller, source = "UserController.rs", |ctx| {
    let service = ctx
        .service::<UserService>("/User")
        .unwrap_or_else(|| Arc::new(UserService::new()));
    Arc::new(UserController::new(service))
});

/// Logs one line per request ahead of validation and handlers.
pub struct RequestTraceInterceptor;

#[async_trait]
impl Interceptor for RequestTraceInterceptor {
    async fn before(&self, ctx: &RequestContext) -> anyhow::Result<InterceptorFlow> {
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            uri = %ctx.uri,
            xhr = ctx.xhr,
            "request received"
        );
        Ok(InterceptorFlow::Continue)
    }
}

impl HandlerModule for RequestTraceInterceptor {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }

    fn as_interceptor(&self) -> Option<&dyn Interceptor> {
        Some(self)
    }
}

register_module!(kind = Interceptor, source = "RequestTraceInterceptor.rs", |_ctx| {
    Arc::new(RequestTraceInterceptor)
});
