use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use routekit::runtime::{run, Exit, RunOptions, ShutdownOptions};
use routekit::{load_dir, ModuleRegistry, ValidatorFactory};
use routekit_bootstrap::{AppConfig, CliArgs};
use std::path::{Path, PathBuf};

mod handlers;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// RouteKit Server - declarative route binding over discovered modules
#[derive(Parser)]
#[command(name = "routekit-server")]
#[command(about = "RouteKit Server - declarative route binding over discovered modules")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Route descriptor directory override
    #[arg(long)]
    routes_dir: Option<PathBuf>,

    /// Validation schema directory override
    #[arg(long)]
    schemas_dir: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Discover modules, bind routes, report, and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        port: cli.port,
        routes_dir: cli.routes_dir.clone(),
        schemas_dir: cli.schemas_dir.clone(),
    };

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (ROUTEKIT__*) -> 4) CLI overrides
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if cli.verbose > 0 {
        let level = if cli.verbose > 1 { "trace" } else { "debug" };
        config
            .logging
            .get_or_insert_with(routekit_bootstrap::default_logging_config)
            .console_level = level.to_string();
    }

    routekit_bootstrap::logging::init_logging(config.logging.as_ref(), Path::new("."));

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    tracing::info!("RouteKit Server starting");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config),
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    let exit = run(RunOptions {
        addr: config.bind_addr(),
        routes_dir: config.paths.routes_dir.clone(),
        schemas_dir: config.paths.schemas_dir.clone(),
        fatal_grace: config.server.fatal_grace,
        body_limit: config.server.body_limit_bytes,
        shutdown: ShutdownOptions::Signals,
        ready: None,
    })
    .await?;

    if exit == Exit::Fatal {
        tracing::error!("exiting after fatal error");
        std::process::exit(exit.code());
    }
    Ok(())
}

/// Dry run: discover, load and bind, then report what would serve.
fn check_config(config: AppConfig) -> Result<()> {
    let registry = ModuleRegistry::discover_and_build();
    println!("modules discovered: {}", registry.len());

    let files = load_dir(&config.paths.routes_dir);
    let validators = ValidatorFactory::new(&config.paths.schemas_dir);
    let bindings = routekit::bind(&files, &registry, &validators);
    for binding in bindings.bindings() {
        println!("{} {} -> {}", binding.method, binding.path, binding.handler_ref);
    }
    println!(
        "routes bound: {} (skipped: {})",
        bindings.len(),
        bindings.skipped
    );
    Ok(())
}
