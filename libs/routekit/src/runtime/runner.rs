//! The runner: one call that takes a compiled-in module set plus on-disk
//! route and schema directories and turns them into a serving process.
//!
//! Phase order: **discover → load routes → bind → serve → wait → drain**.
//! Discovery and binding never abort on per-item errors; an empty outcome is
//! still a serving process (health endpoint only). Shutdown can be driven by
//! OS signals, an external `CancellationToken`, or an arbitrary future. A
//! fatal error arms a grace-bounded forced exit on top of the graceful
//! drain.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::isolation::{self, ShutdownController, DEFAULT_GRACE};
use crate::registry::ModuleRegistry;
use crate::routes::{bind, load_dir};
use crate::validator::ValidatorFactory;

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

pub struct RunOptions {
    /// Bind address, e.g. `"127.0.0.1:8080"`.
    pub addr: String,
    /// Directory scanned for `*.json` route descriptors.
    pub routes_dir: PathBuf,
    /// Directory validation schemas are loaded from.
    pub schemas_dir: PathBuf,
    /// Grace between the first fatal error and forced exit.
    pub fatal_grace: Duration,
    /// Request body cap, in bytes.
    pub body_limit: usize,
    /// Shutdown strategy.
    pub shutdown: ShutdownOptions,
    /// Receives the bound address once the listener is up. Lets callers
    /// bind to port 0 and learn the actual port.
    pub ready: Option<tokio::sync::oneshot::Sender<std::net::SocketAddr>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            routes_dir: PathBuf::from("config/routes"),
            schemas_dir: PathBuf::from("config/schemas"),
            fatal_grace: DEFAULT_GRACE,
            body_limit: 2 * 1024 * 1024,
            shutdown: ShutdownOptions::Signals,
            ready: None,
        }
    }
}

/// How the process came down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Signal- or token-driven shutdown after a clean drain.
    Clean,
    /// A fatal error armed the shutdown; the supervisor should restart.
    Fatal,
}

impl Exit {
    pub fn code(self) -> i32 {
        match self {
            Exit::Clean => 0,
            Exit::Fatal => 1,
        }
    }
}

async fn health() -> &'static str {
    "Ok."
}

/// Build the application router from whatever discovered and bound.
///
/// Exposed separately from [`run`] so tests can drive the full chain without
/// a listener.
pub fn build_router(
    registry: &ModuleRegistry,
    routes_dir: &std::path::Path,
    schemas_dir: &std::path::Path,
    shutdown: ShutdownController,
    body_limit: usize,
) -> Router {
    let files = load_dir(routes_dir);
    let validators = ValidatorFactory::new(schemas_dir);
    let bindings = bind(&files, registry, &validators);

    bindings
        .into_router(registry)
        .route("/sys/health/ping", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(from_fn_with_state(shutdown, isolation::isolate))
}

/// Full cycle: discover → load routes → bind → serve → wait → drain.
pub async fn run(opts: RunOptions) -> anyhow::Result<Exit> {
    let shutdown = ShutdownController::new(opts.fatal_grace);
    isolation::install_panic_hook(shutdown.clone());

    match opts.shutdown {
        ShutdownOptions::Signals => {
            let controller = shutdown.clone();
            tokio::spawn(async move {
                match routekit_bootstrap::signals::wait_for_shutdown().await {
                    Ok(()) => tracing::info!("shutdown: signal received"),
                    Err(error) => {
                        tracing::warn!(
                            error = %error,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                controller.shutdown();
            });
        }
        ShutdownOptions::Token(token) => {
            let controller = shutdown.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                tracing::info!("shutdown: external token cancelled");
                controller.shutdown();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let controller = shutdown.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                controller.shutdown();
            });
        }
    }

    let registry = ModuleRegistry::discover_and_build();
    tracing::info!(modules = registry.len(), "module discovery complete");

    let router = build_router(
        &registry,
        &opts.routes_dir,
        &opts.schemas_dir,
        shutdown.clone(),
        opts.body_limit,
    );

    // Watchdog: once a fatal error arms the shutdown, the drain gets at
    // most the grace period before the process is forced down. Keyed to
    // the fatal signal rather than the main cancellation token, so a fatal
    // landing while a clean drain is already underway is still bounded.
    {
        let controller = shutdown.clone();
        tokio::spawn(async move {
            await_forced_exit(controller).await;
            tracing::error!("grace period elapsed after fatal error, forcing exit");
            std::process::exit(Exit::Fatal.code());
        });
    }

    let listener = tokio::net::TcpListener::bind(&opts.addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "listening");
    if let Some(ready) = opts.ready {
        let _ = ready.send(local_addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancel_token().cancelled_owned())
        .await?;

    if shutdown.is_fatal() {
        tracing::error!("drained after fatal error");
        Ok(Exit::Fatal)
    } else {
        tracing::info!("drained cleanly");
        Ok(Exit::Clean)
    }
}

/// Resolves once a fatal error has armed the shutdown and the grace period
/// has elapsed; resolving means the drain overran its budget.
pub(crate) async fn await_forced_exit(shutdown: ShutdownController) {
    shutdown.fatal_signal().cancelled().await;
    tokio::time::sleep(shutdown.grace()).await;
}
