//! HTTP server for ceres notebooks.
//!
//! Exposes the document operations of `ceres-core` as JSON routes:
//! create or open a notebook, append and edit cells, execute them against
//! the notebook's kernel and list the results.
//!
//! All notebooks live in one [`DocumentRegistry`] shared by the handlers.
//! Kernels are shut down when the server stops.

pub mod error;
pub mod protocol;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use ceres_core::DocumentRegistry;

pub use error::{ServerError, ServerResult};
pub use routes::{AppState, create_router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Serve `registry` until Ctrl+C, then shut down every kernel.
pub async fn serve(registry: Arc<DocumentRegistry>, config: ServerConfig) -> ServerResult<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| {
            ServerError::InvalidAddress(format!("{}:{}", config.host, config.port))
        })?;

    let state = Arc::new(AppState {
        registry: registry.clone(),
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting ceres server at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown_all().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => {
            tracing::warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
