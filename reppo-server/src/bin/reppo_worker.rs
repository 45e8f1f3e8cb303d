//! Demonstration MCP worker served over stdio
//!
//! Used by the sample manifest and by the integration tests.

use clap::Parser;
use reppo_mcp::server::McpServer;
use reppo_mcp::transport::{shutdown_signal, TransportFactory};
use reppo_server::demo::{DemoProfile, DemoToolbox};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reppo-worker")]
#[command(about = "Demonstration MCP worker for the Reppo orchestrator")]
#[command(version)]
struct Args {
    /// Toolbox to serve
    #[arg(long, value_enum, default_value = "adder")]
    profile: DemoProfile,

    /// Delay before answering anything, to exercise handshake timeouts
    #[arg(long, default_value_t = 0)]
    handshake_delay_ms: u64,

    /// Page size for tools/list
    #[arg(long)]
    page_size: Option<usize>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let mut server = McpServer::new(DemoToolbox::new(args.profile));
    if let Some(page_size) = args.page_size {
        server = server.with_page_size(page_size);
    }
    info!(profile = %args.profile, "Demo worker starting");

    let delay = Duration::from_millis(args.handshake_delay_ms);
    let code = tokio::select! {
        result = async {
            tokio::time::sleep(delay).await;
            server.serve(TransportFactory::stdio()).await
        } => match result {
            Ok(()) => 0,
            Err(e) => {
                error!("Worker failed: {}", e);
                1
            }
        },
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            0
        }
    };

    // the stdin reader blocks runtime shutdown, so exit directly
    std::process::exit(code);
}
