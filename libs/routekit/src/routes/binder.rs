//! Binds declarative route records to registered handler modules.
//!
//! Binding is record-by-record and skip-on-error: a record that cannot be
//! bound is logged and dropped, its siblings bind normally, and startup
//! proceeds with whatever bound. Duplicate (method, URI) pairs resolve
//! first-wins in file-then-record order, which keeps repeated binds over an
//! unchanged input identical.
//!
//! Path patterns are checked against a matcher at bind time, because the
//! router panics at registration on malformed patterns and on parameter-name
//! conflicts between independently authored files. Those records are skipped
//! like any other rejection; router assembly itself never fails.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{RawPathParams, Request};
use axum::response::Response;
use axum::routing::MethodFilter;
use axum::Router;
use thiserror::Error;

use crate::contracts::{HandlerFn, InterceptorFlow, ModuleKind};
use crate::isolation::FailureDomain;
use crate::registry::ModuleRegistry;
use crate::request::RequestContext;
use crate::routes::descriptor::{LoadedRouteFile, RouteRecord};
use crate::validator::{SchemaError, ValidationStage, ValidatorFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl HttpMethod {
    /// Parse the record's httpMethod field. An absent or empty field
    /// defaults to GET.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
        match raw.to_ascii_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "put" => Some(HttpMethod::Put),
            "post" => Some(HttpMethod::Post),
            "delete" => Some(HttpMethod::Delete),
            "head" => Some(HttpMethod::Head),
            _ => None,
        }
    }

    fn filter(self) -> MethodFilter {
        match self {
            HttpMethod::Get => MethodFilter::GET,
            HttpMethod::Put => MethodFilter::PUT,
            HttpMethod::Post => MethodFilter::POST,
            HttpMethod::Delete => MethodFilter::DELETE,
            HttpMethod::Head => MethodFilter::HEAD,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one route record was dropped. Never aborts the bind pass.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("record has an empty requestUri")]
    EmptyUri,
    #[error("bound path '{0}' does not start with '/'")]
    UnroutablePath(String),
    #[error("unsupported httpMethod '{0}'")]
    UnsupportedMethod(String),
    #[error("handler reference '{0}' is not of the form Module.method")]
    BadHandlerRef(String),
    #[error("no controller module named '{0}' is registered")]
    UnknownModule(String),
    #[error("controller '{module}' has no handler named '{handler}'")]
    UnknownHandler { module: String, handler: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// One successfully bound route.
pub struct Binding {
    pub method: HttpMethod,
    pub path: String,
    /// The authored Module.method reference, kept for diagnostics.
    pub handler_ref: String,
    handler: HandlerFn,
    validator: Option<ValidationStage>,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler_ref", &self.handler_ref)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

/// The outcome of binding every loaded route file against the registry.
#[derive(Default)]
pub struct BindingSet {
    bindings: Vec<Binding>,
    keys: HashSet<(HttpMethod, String)>,
    /// Mirror of the router's matcher, used to reject patterns it would
    /// panic on (malformed parameters, conflicting parameter names).
    matcher: matchit::Router<()>,
    pub skipped: usize,
}

impl std::fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingSet")
            .field("bindings", &self.bindings)
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl BindingSet {
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn push(&mut self, binding: Binding, origin: &Path) {
        let key = (binding.method, binding.path.clone());
        if self.keys.contains(&key) {
            self.skipped += 1;
            tracing::warn!(
                method = %binding.method,
                path = %binding.path,
                handler = %binding.handler_ref,
                file = %origin.display(),
                "duplicate route, earlier binding wins"
            );
            return;
        }
        // Same path under another method is already in the matcher.
        let new_path = !self.keys.iter().any(|(_, path)| *path == binding.path);
        if new_path {
            if let Err(error) = self.matcher.insert(binding.path.clone(), ()) {
                self.skipped += 1;
                tracing::warn!(
                    method = %binding.method,
                    path = %binding.path,
                    handler = %binding.handler_ref,
                    file = %origin.display(),
                    error = %error,
                    "route pattern rejected by the matcher, skipped"
                );
                return;
            }
        }
        self.keys.insert(key);
        tracing::info!(
            method = %binding.method,
            path = %binding.path,
            handler = %binding.handler_ref,
            "route bound"
        );
        self.bindings.push(binding);
    }
}

/// Bind every record of every loaded file. Record failures are logged and
/// counted, never propagated.
pub fn bind(
    files: &[LoadedRouteFile],
    registry: &ModuleRegistry,
    validators: &ValidatorFactory,
) -> BindingSet {
    let mut set = BindingSet::default();
    for loaded in files {
        for record in &loaded.file.routes {
            match bind_record(record, &loaded.file.prefix, registry, validators) {
                Ok(binding) => set.push(binding, &loaded.path),
                Err(error) => {
                    set.skipped += 1;
                    tracing::warn!(
                        file = %loaded.path.display(),
                        uri = %record.request_uri,
                        handler = %record.handler,
                        error = %error,
                        "route record not bound, skipped"
                    );
                }
            }
        }
    }
    tracing::info!(bound = set.len(), skipped = set.skipped, "route binding complete");
    set
}

fn bind_record(
    record: &RouteRecord,
    prefix: &str,
    registry: &ModuleRegistry,
    validators: &ValidatorFactory,
) -> Result<Binding, BindError> {
    if record.request_uri.trim().is_empty() {
        return Err(BindError::EmptyUri);
    }
    let method = match record.http_method.as_deref() {
        None => HttpMethod::Get,
        Some(raw) if raw.trim().is_empty() => HttpMethod::Get,
        Some(raw) => {
            HttpMethod::parse(Some(raw)).ok_or_else(|| BindError::UnsupportedMethod(raw.to_string()))?
        }
    };

    let (module, handler_name) = record
        .handler
        .split_once('.')
        .filter(|(m, h)| !m.is_empty() && !h.is_empty())
        .ok_or_else(|| BindError::BadHandlerRef(record.handler.clone()))?;

    // Handler references omit the leading slash of the canonical name.
    let module_key = if module.starts_with('/') {
        module.to_string()
    } else {
        format!("/{module}")
    };
    let entry = registry
        .get(ModuleKind::Controller, &module_key)
        .ok_or_else(|| BindError::UnknownModule(module.to_string()))?;
    let handler = entry
        .instance
        .handler(handler_name)
        .ok_or_else(|| BindError::UnknownHandler {
            module: module.to_string(),
            handler: handler_name.to_string(),
        })?;

    let validator = validators.make(record.validator_schema.as_deref())?;

    // The router rejects paths without a leading slash at registration.
    let path = format!("{prefix}{}", record.request_uri);
    if !path.starts_with('/') {
        return Err(BindError::UnroutablePath(path));
    }

    Ok(Binding {
        method,
        path,
        handler_ref: record.handler.clone(),
        handler,
        validator,
    })
}

/// Per-route execution chain shared across requests: interceptors, then the
/// optional validation stage, then the handler.
#[derive(Clone)]
struct RouteChain {
    handler: HandlerFn,
    validator: Option<ValidationStage>,
    interceptors: Arc<Vec<(String, Arc<dyn crate::contracts::HandlerModule>)>>,
}

impl RouteChain {
    async fn run(self, params: RawPathParams, request: Request) -> Response {
        // The isolation middleware plants the domain; chains exercised
        // without it (router-level tests) get a detached one.
        let domain = request
            .extensions()
            .get::<FailureDomain>()
            .cloned()
            .unwrap_or_else(FailureDomain::detached);

        let ctx = match RequestContext::assemble(params, request, domain.clone()).await {
            Ok(ctx) => ctx,
            Err(rejection) => return rejection,
        };

        for (name, module) in self.interceptors.iter() {
            let Some(interceptor) = module.as_interceptor() else {
                continue;
            };
            match interceptor.before(&ctx).await {
                Ok(InterceptorFlow::Continue) => {}
                Ok(InterceptorFlow::Respond(response)) => {
                    tracing::debug!(
                        request_id = %ctx.request_id,
                        interceptor = %name,
                        "interceptor short-circuited the request"
                    );
                    return response;
                }
                Err(error) => {
                    return domain.recover(error.context(format!("interceptor {name}")));
                }
            }
        }

        if let Some(validator) = &self.validator {
            if let Some(rejection) = validator.check(&ctx) {
                return rejection;
            }
        }

        match (self.handler)(ctx).await {
            Ok(response) => response,
            Err(error) => domain.recover(error),
        }
    }
}

impl BindingSet {
    /// Assemble the bound routes into a router. Every interceptor module in
    /// the registry runs ahead of every bound route, in canonical-name
    /// order.
    pub fn into_router(self, registry: &ModuleRegistry) -> Router {
        let interceptors: Arc<Vec<_>> = Arc::new(
            registry
                .of_kind(ModuleKind::Interceptor)
                .filter(|entry| entry.instance.as_interceptor().is_some())
                .map(|entry| (entry.name.clone(), entry.instance.clone()))
                .collect(),
        );

        let mut router = Router::new();
        for binding in self.bindings {
            let chain = RouteChain {
                handler: binding.handler,
                validator: binding.validator,
                interceptors: interceptors.clone(),
            };
            router = router.route(
                &binding.path,
                axum::routing::on(binding.method.filter(), {
                    move |params: RawPathParams, request: Request| {
                        let chain = chain.clone();
                        async move { chain.run(params, request).await }
                    }
                }),
            );
        }
        router
    }
}
