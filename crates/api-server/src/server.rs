//! Server creation and management utilities
//!
//! Used by the `gbridge serve` command and by tests that need a live
//! listener.

use axum::{routing::{any, get}, Router};
use common::config::ServerConfig;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::AppState;

/// Create the Axum router with all routes configured
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/v1/accounts", get(routes::list_accounts))
        .route("/v1/whoami", get(routes::whoami))
        .route("/v1/{service}/{*path}", any(routes::proxy))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Server handle that can be used to shut down the server
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
}

impl ServerHandle {
    /// Address the server is listening on
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal the server to shut down gracefully
    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Binds `host` as given, so names like `localhost` and bare IPv6
/// addresses such as `::1` both work.
async fn bind(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}:{}: {e}", config.host, config.port))
}

/// Start the server in a background task, returning a handle for shutdown
pub async fn start_server(state: AppState, config: &ServerConfig) -> anyhow::Result<ServerHandle> {
    let listener = bind(config).await?;
    let addr = listener.local_addr()?;
    let app = create_router(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    // Spawn the server in a background task
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Received shutdown signal");
            })
            .await
            .ok();
    });

    tracing::info!("Server started on {}", addr);

    Ok(ServerHandle { addr, shutdown_tx })
}

/// Start the server and block until Ctrl-C (for CLI usage)
pub async fn run_server_blocking(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let listener = bind(config).await?;
    let addr = listener.local_addr()?;
    let app = create_router(state);

    tracing::info!("Server running on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl-C, shutting down");
        })
        .await?;

    Ok(())
}
