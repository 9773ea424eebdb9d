//! Aster notebook server.
//!
//! Hosts any number of notebook sessions behind a WebSocket endpoint.
//!
//! # Architecture
//!
//! The server consists of:
//! - **Host**: Opens, routes to, and closes sessions
//! - **Session**: One notebook with its own extension registry and kernels
//! - **Protocol**: Request, response and notification shapes
//! - **Routes**: HTTP and WebSocket handlers
//! - **Builtins**: Extensions shipped with the server (`calc`, `json`, magics)

pub mod builtins;
pub mod error;
pub mod host;
pub mod protocol;
pub mod routes;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use aster_core::ExtensionCatalog;

pub use builtins::builtin_catalog;
pub use error::{ServerError, ServerResult};
pub use host::SessionHost;
pub use protocol::{Notification, Request, Response, ResponseError};
pub use routes::{AppState, create_router};
pub use session::{NotebookSession, SessionConfig, SessionContent};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Language for notebooks that do not name one.
    pub default_language: Option<String>,
    /// Notification buffer per subscriber before it starts lagging.
    pub notification_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            default_language: Some(builtins::calc::LANGUAGE.to_string()),
            notification_capacity: 256,
        }
    }
}

impl ServerConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            default_language: self.default_language.clone(),
        }
    }

    /// Build a host loading `catalog` into every session.
    pub fn build_host(&self, catalog: ExtensionCatalog) -> SessionHost {
        SessionHost::new(catalog, self.session_config(), self.notification_capacity)
    }
}

/// Start the Aster server with the built-in extensions.
pub async fn serve(config: ServerConfig) -> ServerResult<()> {
    serve_with_catalog(config, builtin_catalog()).await
}

/// Start the Aster server with a caller-supplied extension catalog.
pub async fn serve_with_catalog(config: ServerConfig, catalog: ExtensionCatalog) -> ServerResult<()> {
    let host = Arc::new(config.build_host(catalog));
    let state = Arc::new(AppState { host: host.clone() });
    let app = create_router(state);

    // Build address
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| ServerError::Io {
            message: format!("Invalid address: {}:{}", config.host, config.port),
        })?;

    tracing::info!("Starting Aster server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    // Handle Ctrl+C for graceful shutdown
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await?;

    host.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}
