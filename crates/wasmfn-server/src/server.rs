//! HTTP server implementation.
//!
//! This module provides the main [`WasmServer`] struct for running
//! the wasmfn HTTP ingress.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use wasmfn_common::RuntimeError;
use wasmfn_common::config_file::{CorsConfig, ServerConfigFile};

use crate::router::build_router;
use crate::state::{AppState, DEFAULT_MAX_BODY_BYTES};

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
    /// Largest request body forwarded to a sandbox.
    pub max_body_bytes: usize,
    /// Cross-origin settings.
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 5000)),
            request_timeout_secs: 60,
            graceful_shutdown: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from the `[server]` section of a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if `bind_addr` is not a socket address.
    pub fn from_file(file: &ServerConfigFile) -> Result<Self, RuntimeError> {
        let bind_addr = file.bind_addr.parse().map_err(|e| {
            RuntimeError::invalid_config(format!("Invalid bind_addr '{}': {e}", file.bind_addr))
        })?;

        Ok(Self {
            bind_addr,
            request_timeout_secs: file.request_timeout_secs,
            graceful_shutdown: file.graceful_shutdown,
            max_body_bytes: file.max_body_bytes,
            cors: file.cors.clone(),
        })
    }

    /// Create a new server config with custom bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// wasmfn HTTP ingress server.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use wasmfn_common::{MemoryMetricStore, MemoryStore, RuntimeConfig};
/// use wasmfn_server::{AppState, ServerConfig, WasmServer};
///
/// let state = AppState::new(
///     &RuntimeConfig::default(),
///     Arc::new(MemoryStore::new()),
///     Arc::new(MemoryMetricStore::new()),
/// )?;
///
/// WasmServer::new(state, ServerConfig::default()).run().await?;
/// ```
pub struct WasmServer {
    state: AppState,
    config: ServerConfig,
}

impl WasmServer {
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        let state = state.with_max_body_bytes(config.max_body_bytes);
        Self { state, config }
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let app = build_router(self.state, self.config.request_timeout(), &self.config.cors);

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to bind: {e}")))?;

        info!(addr = %self.config.bind_addr, "Starting HTTP server");

        if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| RuntimeError::invalid_config(format!("Server error: {e}")))?;
        } else {
            axum::serve(listener, app)
                .await
                .map_err(|e| RuntimeError::invalid_config(format!("Server error: {e}")))?;
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server and return a handle for testing.
    ///
    /// The server binds to an ephemeral port (127.0.0.1:0) and
    /// returns a handle that can be used to get the actual address
    /// and shut down the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start_test(state: AppState) -> Result<TestHandle, RuntimeError> {
        let config = ServerConfig::default();
        let app = build_router(state.clone(), config.request_timeout(), &config.cors);

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to bind: {e}")))?;

        let addr = listener
            .local_addr()
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to get addr: {e}")))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
pub struct TestHandle {
    addr: SocketAddr,
    state: AppState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the application state (for seeding endpoints and publishing).
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
