//! Ark backup controller
//!
//! Main entry point. Parses configuration, sets up the Kubernetes client,
//! and runs the Backup controller alongside the metrics server.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ark_backup_controller::{
    config::ControllerConfig,
    controllers,
    crd::generate_crds,
    metrics,
    plugin::{InProcessPluginManager, StripServerMetadataAction},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControllerConfig::parse();

    if config.crd {
        for crd in generate_crds() {
            println!("---");
            print!("{}", crd);
        }
        return Ok(());
    }

    init_tracing();
    config.validate()?;

    info!("Starting Ark backup controller");

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let plugins = Arc::new(
        InProcessPluginManager::new()
            .register("strip-server-metadata", || Arc::new(StripServerMetadataAction)),
    );

    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let backup_controller = controllers::run_backup_controller(client, config, plugins);

    tokio::select! {
        _ = backup_controller => {
            error!("Backup controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping controller");
        }
    }

    info!("Ark backup controller stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
