mod app;
mod config;
mod cors;
mod errors;
mod handlers;
mod models;
mod storage;
mod telemetry;

use axum::Router;
use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;

use crate::app::AppState;
use crate::config::Config;
use crate::storage::DiskStore;

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

async fn run(app: Router, config: &Config) -> anyhow::Result<()> {
    // runs the webserver
    let listener = TcpListener::bind(config.bind_addr()).await?;

    tracing::info!("Server is running on :{}", config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    drop(dotenv());

    let config = Config::parse();
    telemetry::init()?;

    // nothing can be served without storage, so this is fatal
    let store = DiskStore::open(&config.upload_dir)
        .await
        .inspect_err(|err| tracing::error!("{}", err))?;
    tracing::info!(path = %store.root().display(), "Using upload directory");

    let app = app::router(AppState::new(config.clone(), store))?;

    run(app, &config).await
}
