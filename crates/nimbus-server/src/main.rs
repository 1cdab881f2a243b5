//! Nimbus server binary.

use clap::Parser;
use nimbus_server::{ServerConfig, Services};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Nimbus deployment and orchestration server.
#[derive(Parser, Debug)]
#[command(name = "nimbus-server")]
#[command(about = "Run the nimbus dispatcher, orchestration engine and HTTP API")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug,hyper=info,tower=info"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    info!("Nimbus server starting");

    let config = ServerConfig::load(cli.config.as_deref())?;

    info!(
        listen = %config.server.listen,
        queue = %config.server.queue,
        deadline = ?config.deployment.deadline(),
        "Configuration loaded"
    );

    let mut services = Services::new(config);
    services.start().await?;

    let cancel = services.cancel_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    services.wait().await;

    info!("Nimbus server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
