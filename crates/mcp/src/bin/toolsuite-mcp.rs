// Standalone MCP server binary

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use toolsuite_mcp::{catalog, Args, McpServer, Settings};

fn init_tracing(json: bool) {
    // stdout carries the protocol, so logs go to stderr
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "toolsuite=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Toolsuite MCP server starting...");

    let settings = Settings::load(&args)?;
    for root in settings.sandbox.allowed_roots() {
        tracing::info!(root = %root.display(), "Sandbox root");
    }

    let backends = settings.backends()?;
    let registry = catalog(&backends).context("Failed to build tool registry")?;
    tracing::info!("Registered {} tools", registry.len());

    let shutdown = CancellationToken::new();
    let server = McpServer::new(Arc::new(registry), settings.path_sandbox())
        .with_call_timeout(settings.call_timeout)
        .with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    server.start().await?;
    tracing::info!("Toolsuite MCP server stopped");

    Ok(())
}
