//! # RouteKit - Declarative Route Binding
//!
//! Convention-based module discovery plus declarative, file-driven route
//! binding with per-request fault isolation.
//!
//! ## Features
//!
//! - **Declarative**: Use `register_module!` to declare handler modules;
//!   routes live in JSON descriptor files, not in code
//! - **Auto-discovery**: Modules are collected via inventory at startup,
//!   keyed by the suffix convention (`UserController.rs` → `/User`)
//! - **Skip, never abort**: a broken file, record or schema is logged and
//!   dropped; its siblings bind and the process starts
//! - **Fault isolation**: every request runs in its own failure domain;
//!   an unrecovered error answers the client, then arms a grace-bounded
//!   process shutdown
//!
//! ## Basic Example
//!
//! ```rust,ignore
//! use routekit::{register_module, HandlerModule, handler_fn, HandlerFn};
//!
//! struct UserController;
//!
//! impl HandlerModule for UserController {
//!     fn handler(&self, name: &str) -> Option<HandlerFn> {
//!         match name {
//!             "fetch_all" => Some(handler_fn(|ctx| async move { /* ... */ })),
//!             _ => None,
//!         }
//!     }
//!     fn as_any_arc(self: std::sync::Arc<Self>) -> std::sync::Arc<dyn std::any::Any + Send + Sync> {
//!         self
//!     }
//! }
//!
//! register_module!(kind = Controller, source = "UserController.rs", |_ctx| {
//!     std::sync::Arc::new(UserController)
//! });
//! ```
//!
//! With a route descriptor:
//!
//! ```json
//! {
//!     "config": { "status": "ACTIVE", "prefix": "/api" },
//!     "routes": [
//!         { "requestUri": "/users", "handler": "User.fetch_all" }
//!     ]
//! }
//! ```

pub mod contracts;
pub mod isolation;
pub mod registry;
pub mod request;
pub mod routes;
pub mod runtime;
pub mod validator;

// Re-exported for the `register_module!` macro expansion.
pub use inventory;

pub use contracts::{
    handler_fn, HandlerFn, HandlerFuture, HandlerModule, Initializable, Interceptor,
    InterceptorFlow, ModuleKind,
};
pub use isolation::{FailureDomain, ShutdownController, DEFAULT_GRACE};
pub use registry::{
    canonical_name, ModuleContext, ModuleEntry, ModuleRegistration, ModuleRegistry, RegistryBuilder,
};
pub use request::RequestContext;
pub use routes::{bind, load_dir, BindingSet, HttpMethod};
pub use runtime::{run, Exit, RunOptions, ShutdownOptions};
pub use validator::{SchemaError, ValidationStage, ValidatorFactory};
