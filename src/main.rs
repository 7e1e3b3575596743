// MoltGuard gateway binary

use anyhow::{Context, Result};
use moltguard::config::GatewayConfig;
use moltguard::proxy::{self, AppState};
use moltguard::vault::{persistence, TokenVault, DEFAULT_PURGE_INTERVAL_SECS};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moltguard=info".into()),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config =
        GatewayConfig::load(config_path.as_deref()).context("failed to load configuration")?;

    let vault_path = persistence::default_vault_path()
        .context("cannot determine home directory for the token vault")?;
    let vault = TokenVault::open(&vault_path).context("failed to open the token vault")?;
    vault.start_purge_timer(DEFAULT_PURGE_INTERVAL_SECS);

    let state = AppState::new(config, Arc::clone(&vault));
    let gateway_session = state.gateway_session;
    tracing::info!(session = %gateway_session, "gateway session ready");

    proxy::serve(state, shutdown_signal())
        .await
        .context("server failed")?;

    // Drained: tear down the shared session and flush the vault before exit.
    vault.destroy_session(gateway_session);
    vault.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining");
}
