//! Per-request fault isolation and fatal-error recovery.
//!
//! Every inbound request runs inside its own [`FailureDomain`]. Errors that
//! escape a handler chain, panics during request processing, and failures of
//! detached work spawned from a request all funnel into one recovery
//! routine: log, best-effort client response, then an armed, grace-bounded
//! process shutdown. An unrecovered error is treated as a signal that
//! process-wide state may be compromised; the process does not keep serving
//! past the drain, an external supervisor is expected to restart it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::FutureExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::request::is_xhr;

/// Grace period between the first fatal error and forced process exit.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

struct ControllerInner {
    cancel: CancellationToken,
    fatal_signal: CancellationToken,
    fatal: AtomicBool,
    grace: Duration,
}

/// Process-global shutdown coordination.
///
/// The cancellation token is the observable shutdown signal: the runner
/// serves with graceful shutdown against it, so cancelling lets in-flight
/// requests complete. The fatal flag is armed at most once, by whichever
/// unrecovered error comes first.
#[derive(Clone)]
pub struct ShutdownController(Arc<ControllerInner>);

impl ShutdownController {
    pub fn new(grace: Duration) -> Self {
        Self(Arc::new(ControllerInner {
            cancel: CancellationToken::new(),
            fatal_signal: CancellationToken::new(),
            fatal: AtomicBool::new(false),
            grace,
        }))
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.0.cancel.clone()
    }

    /// Cancelled when a fatal error arms the shutdown. Distinct from
    /// [`cancel_token`](Self::cancel_token) so the fatal path stays
    /// observable even when a clean shutdown already cancelled the main
    /// token.
    pub fn fatal_signal(&self) -> CancellationToken {
        self.0.fatal_signal.clone()
    }

    pub fn grace(&self) -> Duration {
        self.0.grace
    }

    pub fn is_fatal(&self) -> bool {
        self.0.fatal.load(Ordering::SeqCst)
    }

    /// Clean shutdown (signal-driven); does not mark the process fatal.
    pub fn shutdown(&self) {
        self.0.cancel.cancel();
    }

    /// Funnel for unrecovered errors. Logs the error and, exactly once,
    /// arms the grace-bounded shutdown.
    pub fn fatal(&self, error: &dyn std::fmt::Display) {
        tracing::error!(error = %error, "fatal error occurred, triggering graceful shutdown");
        if self.0.fatal.swap(true, Ordering::SeqCst) {
            return;
        }
        self.0.fatal_signal.cancel();
        self.0.cancel.cancel();
    }
}

struct DomainInner {
    request_id: Uuid,
    xhr: bool,
    shutdown: ShutdownController,
}

/// The isolated failure domain one request executes in.
///
/// Cloning shares the domain; domains never nest and never share mutable
/// state with each other.
#[derive(Clone)]
pub struct FailureDomain(Arc<DomainInner>);

impl FailureDomain {
    pub fn new(request_id: Uuid, xhr: bool, shutdown: ShutdownController) -> Self {
        Self(Arc::new(DomainInner {
            request_id,
            xhr,
            shutdown,
        }))
    }

    /// A standalone domain wired to a controller nobody watches. Used when a
    /// chain runs without the isolation middleware, e.g. in router-level
    /// tests; failures are still logged.
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4(), false, ShutdownController::new(DEFAULT_GRACE))
    }

    pub fn request_id(&self) -> Uuid {
        self.0.request_id
    }

    pub fn xhr(&self) -> bool {
        self.0.xhr
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.0.shutdown
    }

    /// The recovery routine: log, arm shutdown, answer the client without
    /// leaking internal detail.
    pub fn recover(&self, error: anyhow::Error) -> Response {
        self.0
            .shutdown
            .fatal(&format_args!("request {}: {error:#}", self.0.request_id));
        if self.0.xhr {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal error occurred." })),
            )
                .into_response()
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.").into_response()
        }
    }

    /// Run detached work inside this domain. A panic or error in the task
    /// funnels into the same recovery path; since the response may already
    /// be gone, recovery here is log-and-arm only.
    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<()>
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let domain = self.clone();
        tokio::spawn(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => domain.0.shutdown.fatal(&format_args!(
                    "detached task of request {}: {error:#}",
                    domain.0.request_id
                )),
                Err(panic) => domain.0.shutdown.fatal(&format_args!(
                    "detached task of request {} panicked: {}",
                    domain.0.request_id,
                    panic_message(&panic)
                )),
            }
        })
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic of unknown type".to_string()
    }
}

/// Middleware establishing the failure domain for each inbound request.
///
/// The domain is available to the chain through request extensions; the
/// whole downstream runs under `catch_unwind` so a panic anywhere in the
/// request, sync or at a later suspension point, is captured here and never
/// propagated to another request's domain.
pub async fn isolate(
    State(shutdown): State<ShutdownController>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let domain = FailureDomain::new(request_id, is_xhr(request.headers()), shutdown);
    request.extensions_mut().insert(domain.clone());
    tracing::debug!(
        %request_id,
        method = %request.method(),
        uri = %request.uri(),
        "request bound to failure domain"
    );

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => domain.recover(anyhow::anyhow!("{}", panic_message(&panic))),
    }
}

/// Route panics raised outside any request domain into the same recovery
/// funnel, treated as belonging to no specific request.
pub fn install_panic_hook(shutdown: ShutdownController) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        shutdown.fatal(info);
        previous(info);
    }));
}
