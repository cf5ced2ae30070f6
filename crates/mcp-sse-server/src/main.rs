//! MCP Calculator Server - calculator tools over the SSE transport.
//!
//! Clients open `GET /sse`, receive their request address, and POST
//! `tools/call` messages there; results come back on the stream.

mod tools;

use anyhow::Result;
use clap::Parser;
use mcp_sse_core::{start_server, ServerConfig, TransportConfig};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "mcp-calculator")]
#[command(about = "MCP calculator server with SSE transport")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("Starting MCP Calculator Server (SSE transport)");

    let registry = tools::calculator_registry()?;
    info!("Available tools: {}", registry.names().join(", "));

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    };
    let mut server = start_server(config, registry).await?;

    // Machine-readable port line for launchers and tests
    println!("MCP_PORT={}", server.port());

    info!(
        "Stream endpoint: http://{}{}",
        server.addr(),
        TransportConfig::SSE_PATH
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    server.shutdown();
    server.join().await;

    Ok(())
}
