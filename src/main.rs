//! wasmfn CLI entry point.
//!
//! Loads a TOML config file, seeds the endpoints it lists into the in-memory
//! store, and serves them over HTTP.
//!
//! ```text
//! wasmfn --config wasmfn.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wasmfn_common::config_file::{ConfigFile, EndpointEntry};
use wasmfn_common::{Deployment, Endpoint, MemoryMetricStore, MemoryStore};
use wasmfn_server::{AppState, ServerConfig, WasmServer};

#[derive(Parser)]
#[command(name = "wasmfn", about = "Run WebAssembly functions behind HTTP endpoints")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "WASMFN_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address from the config file.
    #[arg(long, env = "BIND_ADDR")]
    bind_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wasmfn=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (file, base_dir) = match &cli.config {
        Some(path) => {
            let file = ConfigFile::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (file, base_dir)
        }
        None => (ConfigFile::default(), PathBuf::new()),
    };

    let mut server_config = ServerConfig::from_file(&file.server)?;
    if let Some(addr) = cli.bind_addr {
        server_config = server_config.with_bind_addr(addr);
    }

    info!(
        bind_addr = %server_config.bind_addr,
        endpoints = file.endpoints.len(),
        "Configuration loaded"
    );

    let state = AppState::new(
        &file.runtime,
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryMetricStore::new()),
    )?;

    for entry in &file.endpoints {
        seed_endpoint(&state, entry, &base_dir)
            .with_context(|| format!("Failed to seed endpoint '{}'", entry.name))?;
    }

    info!("Server initialized. Available endpoints:");
    info!("  GET  /health                      - Health check");
    info!("  GET  /ready                       - Readiness check");
    info!("  ANY  /live/:endpoint_id/*path     - Invoke the active deployment");
    info!("  ANY  /preview/:deployment_id/*path - Invoke a specific deployment");

    WasmServer::new(state, server_config).run().await?;

    Ok(())
}

/// Create an endpoint and a deployment from a config entry, publishing it if
/// requested.
fn seed_endpoint(state: &AppState, entry: &EndpointEntry, base_dir: &Path) -> anyhow::Result<()> {
    let path = base_dir.join(&entry.path);
    let blob =
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;

    let endpoint = Endpoint::new(&entry.name, entry.runtime, entry.environment.clone());
    let endpoint_id = endpoint.id;
    let url = endpoint.url.clone();
    state.store().create_endpoint(endpoint)?;

    let deployment = Deployment::new(endpoint_id, blob);
    let deployment_id = deployment.id;
    let hash = deployment.hash.clone();
    state.store().create_deployment(deployment)?;

    if entry.publish {
        state.publish(deployment_id)?;
    }

    info!(
        name = %entry.name,
        runtime = %entry.runtime,
        %endpoint_id,
        %deployment_id,
        %hash,
        %url,
        published = entry.publish,
        "Endpoint seeded"
    );
    Ok(())
}
