use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use futures::future::BoxFuture;

use crate::request::RequestContext;

/// Boxed future produced by an invocable handler method.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Response>>;

/// An invocable member of a handler module, resolved by name at bind time.
///
/// The signature is checked at compile time; the route binder only checks
/// that a member with the requested name exists.
pub type HandlerFn = Arc<dyn Fn(RequestContext) -> HandlerFuture + Send + Sync>;

/// The kinds of handler modules the registry distinguishes.
///
/// Canonical names are unique within a kind, never across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleKind {
    Controller,
    Interceptor,
    Service,
    Model,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 4] = [
        ModuleKind::Controller,
        ModuleKind::Interceptor,
        ModuleKind::Service,
        ModuleKind::Model,
    ];

    /// Order modules are constructed in during discovery: dependencies
    /// first, so controllers can resolve services and models from the
    /// construction context.
    pub(crate) fn construction_phase(self) -> u8 {
        match self {
            ModuleKind::Model => 0,
            ModuleKind::Service => 1,
            ModuleKind::Interceptor => 2,
            ModuleKind::Controller => 3,
        }
    }

    /// Filename suffix a source file must carry directly before its
    /// extension to qualify as a module of this kind.
    pub fn suffix(self) -> &'static str {
        match self {
            ModuleKind::Controller => "Controller",
            ModuleKind::Interceptor => "Interceptor",
            ModuleKind::Service => "Service",
            ModuleKind::Model => "Model",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Optional capability: a zero-argument initialization hook, invoked
/// synchronously before the module is inserted into the registry.
///
/// A hook error aborts registration of this module only; discovery of the
/// remaining modules continues.
pub trait Initializable: Send + Sync {
    fn init(&self) -> anyhow::Result<()>;
}

/// Flow decision returned by an interceptor stage.
pub enum InterceptorFlow {
    /// Continue with the next stage of the chain.
    Continue,
    /// Short-circuit the chain with this response.
    Respond(Response),
}

/// Optional capability: a pre-handler stage that runs, for every bound
/// route, ahead of validation and the business handler.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn before(&self, ctx: &RequestContext) -> anyhow::Result<InterceptorFlow>;
}

/// A handler module held by the registry.
///
/// Capabilities are explicit: a module opts into initialization or
/// interception by overriding the corresponding accessor, instead of the
/// registry probing for members at runtime.
pub trait HandlerModule: Send + Sync + 'static {
    /// Look up an invocable member by name. Modules without invocable
    /// members (services, models) keep the default.
    fn handler(&self, name: &str) -> Option<HandlerFn> {
        let _ = name;
        None
    }

    /// Return self as a shared `Any` handle, so consumers holding the
    /// registry entry can recover the concrete module type.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync>;

    /// Return self as Initializable if this module has an init hook.
    fn as_initializable(&self) -> Option<&dyn Initializable> {
        None
    }

    /// Return self as an Interceptor if this module intercepts requests.
    fn as_interceptor(&self) -> Option<&dyn Interceptor> {
        None
    }
}

/// Adapt an async closure or fn into a [`HandlerFn`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}
