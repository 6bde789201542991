//! # Feedline Server
//!
//! Runs the feed cache pipeline: event consumers for fan-out and post
//! activity, cache heating and reclamation on a cron schedule.

use feedline_config::ConfigLoader;
use feedline_core::telemetry::init_telemetry;
use feedline_core::FeedResult;
use feedline_server::startup::{install_metrics, print_banner, print_startup_info};
use feedline_server::App;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {}", e);
        eprintln!("feedline: {e}");
        std::process::exit(1);
    }
}

async fn run() -> FeedResult<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    init_telemetry(&config.observability.telemetry())?;
    print_banner();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    print_startup_info(&config);

    install_metrics(&config.observability)?;

    let app = App::build(config).await?;
    app.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
