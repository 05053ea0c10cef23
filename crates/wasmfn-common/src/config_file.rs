//! Configuration file structures for wasmfn.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP ingress settings
//! - [`CorsConfig`]: Cross-origin settings for the ingress
//! - [`EndpointEntry`]: Endpoint seeded into the store at startup

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;
use crate::types::RuntimeKind;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// pooling_allocator = true
///
/// [runtime.actors]
/// keep_alive_ms = 1000
///
/// [runtime.sandbox]
/// js_interpreter_path = "./interpreters/js.wasm"
///
/// [server]
/// bind_addr = "0.0.0.0:5000"
///
/// [server.cors]
/// origin = "https://localhost"
/// allowed_methods = "GET, POST"
/// allowed_headers = "Content-Type"
///
/// [[endpoints]]
/// name = "hello"
/// runtime = "go"
/// path = "./functions/hello.wasm"
/// environment = { GREETING = "hi" }
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine, execution, actors, sandbox).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// HTTP ingress configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Endpoints to seed at startup.
    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// HTTP ingress configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:5000").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Outer request timeout in seconds, applied by the HTTP layer.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,

    /// Largest request body forwarded to a sandbox.
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,

    /// Cross-origin settings.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
            max_body_bytes: defaults::max_body_bytes(),
            cors: CorsConfig::default(),
        }
    }
}

/// Cross-origin settings for the ingress.
///
/// `"*"` in any field allows everything.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Allowed origin.
    #[serde(default = "defaults::any")]
    pub origin: String,

    /// Comma separated list of allowed methods.
    #[serde(default = "defaults::any")]
    pub allowed_methods: String,

    /// Comma separated list of allowed headers.
    #[serde(default = "defaults::any")]
    pub allowed_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: defaults::any(),
            allowed_methods: defaults::any(),
            allowed_headers: defaults::any(),
        }
    }
}

/// An endpoint to seed at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointEntry {
    /// Human readable name of the endpoint.
    pub name: String,

    /// Runtime kind the blob targets.
    pub runtime: RuntimeKind,

    /// Path to the deployment blob (wasm module or script).
    pub path: String,

    /// Environment passed to every invocation.
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Publish the seeded deployment so it is reachable under `/live`.
    #[serde(default = "defaults::publish")]
    pub publish: bool,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:5000".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        60
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub const fn max_body_bytes() -> usize {
        4 * 1024 * 1024
    }

    pub fn any() -> String {
        "*".to_string()
    }

    pub const fn publish() -> bool {
        true
    }
}
