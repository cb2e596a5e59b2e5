use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sandboxd::api;
use sandboxd::config::Config;
use sandboxd::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "sandboxd")]
#[command(
    author,
    version,
    about = "Sandbox execution orchestrator - build and run packaged projects in containers"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Directory containing sandboxd.toml (defaults to the
        /// current directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("sandboxd=debug")
    } else {
        EnvFilter::new("sandboxd=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, config } => {
            serve(port, config).await?;
        }
    }

    Ok(())
}

async fn serve(port: u16, config_dir: Option<PathBuf>) -> Result<()> {
    let work_dir = match config_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    let config = Config::load(&work_dir)?;
    config.validate()?;

    let orchestrator = Arc::new(Orchestrator::new(config));
    let app = api::router(Arc::clone(&orchestrator));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Retire every instance before the process exits.
    orchestrator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install shutdown signal handler: {}", e);
        // Fall back to never resolving; the server keeps running.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
