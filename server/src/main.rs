//! previewd server entry point.
//!
//! Initialises tracing, loads configuration from `PREVIEWD_*` environment
//! variables, starts the idle reaper and serves the REST surface until
//! SIGINT or SIGTERM, then stops every instance.

use anyhow::{Context, Result};
use previewd::api;
use previewd::app::AppContext;
use previewd_common::ServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %format!("{e:#}"), "previewd failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config: ServerConfig = envy::prefixed("PREVIEWD_")
        .from_env()
        .context("failed to load config from PREVIEWD_* env vars")?;
    let ctx = AppContext::new(config)?;

    tracing::info!(
        listen_addr = %ctx.config.listen_addr,
        workspace_root = %ctx.config.workspace_root.display(),
        ports = %format!("{}-{}", ctx.config.port_range_start, ctx.config.port_range_end),
        tunnel = ?ctx.config.tunnel,
        "configuration loaded",
    );

    ctx.manager
        .spawn_reaper(ctx.config.sweep_interval())
        .await
        .context("starting idle reaper")?;

    let listener = tokio::net::TcpListener::bind(ctx.config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", ctx.config.listen_addr))?;
    tracing::info!("previewd ready on http://{}", ctx.config.listen_addr);

    let served = axum::serve(listener, api::router(ctx.manager.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error");

    ctx.manager.shutdown().await;
    tracing::info!("previewd shut down");
    served
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("received shutdown signal");
}
