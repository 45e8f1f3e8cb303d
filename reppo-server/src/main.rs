//! Reppo orchestrator
//!
//! Launches the MCP workers declared in a manifest and serves the
//! orchestrator's own MCP surface over stdio (default) or HTTP.

use clap::Parser;
use reppo_core::Manifest;
use reppo_mcp::server::McpServer;
use reppo_mcp::transport::{shutdown_signal, TransportFactory};
use reppo_server::{
    config::Config, http, Error, Orchestrator, OrchestratorTools, Result, StartupPolicy,
    TransportMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Supervisor and tool-call proxy for MCP sub-servers
#[derive(Parser)]
#[command(name = "reppo-orchestrator")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker manifest (overrides orchestrator.manifest_path)
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Transport for the orchestrator's MCP surface
    #[arg(long, value_enum)]
    transport: Option<TransportMode>,

    /// Override HTTP host
    #[arg(long)]
    host: Option<String>,

    /// Override HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// What to do when a worker fails to start
    #[arg(long, value_enum)]
    startup_policy: Option<StartupPolicy>,
}

fn main() {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(Cli::parse())) {
        Ok(()) => 0,
        Err(e) => {
            error!("Orchestrator failed: {}", e);
            eprintln!("reppo-orchestrator: {}", e);
            1
        }
    };

    // the stdin reader blocks runtime shutdown, so exit directly
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    apply_cli_overrides(&mut config, &cli);
    config.validate()?;

    let _guard = init_tracing(&config)?;

    info!("Starting Reppo orchestrator");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let manifest_path = &config.orchestrator.manifest_path;
    let manifest = Manifest::load(manifest_path)?;
    info!(
        "Loaded {} worker declarations from {}",
        manifest.len(),
        manifest_path.display()
    );

    let orchestrator = Arc::new(Orchestrator::new(&config.orchestrator));
    orchestrator.start(&manifest).await?;

    let server = McpServer::new(OrchestratorTools::new(orchestrator.clone()));
    let outcome = match config.transport.mode {
        TransportMode::Stdio => {
            info!("Serving MCP over stdio");
            tokio::select! {
                result = server.serve(TransportFactory::stdio()) => result.map_err(Error::from),
                _ = shutdown_signal() => {
                    info!("Shutdown signal received");
                    Ok(())
                }
            }
        }
        TransportMode::Http => http::serve(config.http_addr()?, server, shutdown_signal()).await,
    };

    info!("Stopping workers");
    orchestrator.stop().await;
    info!("Reppo orchestrator shut down");
    outcome
}

/// Apply CLI argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(manifest) = &cli.manifest {
        config.orchestrator.manifest_path = manifest.clone();
    }
    if let Some(mode) = cli.transport {
        config.transport.mode = mode;
    }
    if let Some(host) = &cli.host {
        config.transport.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.transport.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(policy) = cli.startup_policy {
        config.orchestrator.startup_policy = policy;
    }
}

/// Console logging to stderr, plus a daily rolling file when configured
///
/// Stdout carries the MCP stream, so nothing is ever logged there.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let console = if config.logging.format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter())
            .boxed()
    };

    let (file, guard) = match &config.logging.log_directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "reppo-orchestrator.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter())
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::Internal(anyhow::anyhow!("Failed to initialize tracing: {}", e)))?;
    Ok(guard)
}
