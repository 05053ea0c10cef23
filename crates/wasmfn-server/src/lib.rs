//! HTTP ingress for wasmfn.
//!
//! This crate terminates HTTP and hands requests to the actor layer:
//!
//! - Path routing for `/live/{endpointID}/...` and `/preview/{deploymentID}/...`
//! - Wire request construction from the HTTP request and the endpoint
//! - Correlation of actor responses with waiting handlers ([`WasmProxy`])
//! - Health and readiness checks
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wasmfn_common::{MemoryMetricStore, MemoryStore, RuntimeConfig};
//! use wasmfn_server::{AppState, ServerConfig, WasmServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = AppState::new(
//!         &RuntimeConfig::default(),
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(MemoryMetricStore::new()),
//!     )?;
//!
//!     WasmServer::new(state, ServerConfig::default()).run().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod handler;
pub mod proxy;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use error::IngressError;
pub use proxy::{ProxyHandle, WasmProxy};
pub use server::{ServerConfig, TestHandle, WasmServer};
pub use state::AppState;
