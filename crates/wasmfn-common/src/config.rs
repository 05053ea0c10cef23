//! Configuration structures for wasmfn.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, caching, epochs)
//! - [`ExecutionConfig`]: Per-request execution limits (fuel, timeout, output size)
//! - [`ActorConfig`]: Keep-alive and deadline settings for the actor layer
//! - [`SandboxConfig`]: Interpreter images for scripted runtime kinds

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for wasmfn.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-request execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Actor keep-alive and deadlines.
    #[serde(default)]
    pub actors: ActorConfig,

    /// Interpreter images for scripted runtimes.
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior,
/// including memory allocation strategy and compilation caching.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for high-performance instance creation.
    ///
    /// When enabled, memory is pre-allocated for a pool of instances,
    /// reducing instantiation time from ~1ms to ~10µs.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// This determines the maximum linear memory each instance can use.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable Wasmtime's on-disk cache of compiled artifacts.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,

    /// Path to a Wasmtime cache configuration file.
    ///
    /// Only effective when `cache_compiled_modules` is enabled. Wasmtime's
    /// default cache location is used when unset.
    #[serde(default)]
    pub cache_dir: Option<String>,

    /// Enable epoch-based interruption.
    ///
    /// This allows interrupting long-running WebAssembly execution
    /// based on time rather than fuel consumption.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Interval between epoch increments in milliseconds.
    #[serde(default = "defaults::epoch_tick_ms")]
    pub epoch_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
            cache_dir: None,
            epoch_interruption: defaults::epoch_interruption(),
            epoch_tick_ms: defaults::epoch_tick_ms(),
        }
    }
}

impl EngineConfig {
    /// Get the epoch tick interval as a `Duration`.
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms.max(1))
    }
}

/// Per-request execution configuration.
///
/// These settings control resource limits for individual WebAssembly executions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per request.
    ///
    /// Guest language runtimes (Go, an embedded JS interpreter) spend a
    /// large amount of fuel on start-up alone, so the default is generous.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Execution timeout in milliseconds.
    ///
    /// Enforced through epoch interruption, one epoch per `epoch_tick_ms`.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Enable fuel metering.
    ///
    /// When enabled, CPU usage is tracked and limited by the `max_fuel` setting.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Maximum number of bytes a guest may write to stdout per request.
    #[serde(default = "defaults::stdout_capacity_bytes")]
    pub stdout_capacity_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            timeout_ms: defaults::timeout_ms(),
            fuel_metering: defaults::fuel_metering(),
            stdout_capacity_bytes: defaults::stdout_capacity_bytes(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Actor layer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActorConfig {
    /// Idle period after which an execution actor terminates itself.
    #[serde(default = "defaults::keep_alive_ms")]
    pub keep_alive_ms: u64,

    /// How long the ingress waits for the directory to hand out a runtime.
    #[serde(default = "defaults::activation_timeout_ms")]
    pub activation_timeout_ms: u64,

    /// How long the ingress waits for a correlated response.
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            keep_alive_ms: defaults::keep_alive_ms(),
            activation_timeout_ms: defaults::activation_timeout_ms(),
            request_timeout_ms: defaults::request_timeout_ms(),
        }
    }
}

impl ActorConfig {
    /// Get the keep-alive window as a `Duration`.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Get the activation deadline as a `Duration`.
    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    /// Get the request deadline as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Interpreter images for scripted runtime kinds.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SandboxConfig {
    /// Path to the wasm image of the JavaScript interpreter.
    ///
    /// The interpreter is invoked as `["", "-e", <script>]`.
    #[serde(default)]
    pub js_interpreter_path: Option<PathBuf>,
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn cache_compiled_modules() -> bool {
        false
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn epoch_tick_ms() -> u64 {
        1
    }

    pub const fn max_fuel() -> u64 {
        1_000_000_000
    }

    pub const fn timeout_ms() -> u64 {
        10_000
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn stdout_capacity_bytes() -> usize {
        16 * 1024 * 1024
    }

    pub const fn keep_alive_ms() -> u64 {
        1_000
    }

    pub const fn activation_timeout_ms() -> u64 {
        100
    }

    pub const fn request_timeout_ms() -> u64 {
        30_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert!(config.engine.pooling_allocator);
        assert_eq!(config.engine.max_instances, 1000);
        assert_eq!(config.engine.instance_memory_mb, 64);
        assert!(config.engine.epoch_interruption);
        assert_eq!(config.engine.epoch_tick(), Duration::from_millis(1));

        assert_eq!(config.execution.max_fuel, 1_000_000_000);
        assert_eq!(config.execution.timeout_ms, 10_000);
        assert!(config.execution.fuel_metering);

        assert_eq!(config.actors.keep_alive(), Duration::from_secs(1));
        assert_eq!(config.actors.activation_timeout(), Duration::from_millis(100));
        assert!(config.sandbox.js_interpreter_path.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RuntimeConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            config.engine.max_instances,
            deserialized.engine.max_instances
        );
        assert_eq!(config.execution.max_fuel, deserialized.execution.max_fuel);
        assert_eq!(
            config.actors.keep_alive_ms,
            deserialized.actors.keep_alive_ms
        );
    }

    #[test]
    fn test_execution_timeout() {
        let config = ExecutionConfig {
            timeout_ms: 500,
            ..Default::default()
        };

        assert_eq!(config.timeout(), std::time::Duration::from_millis(500));
    }

    #[test]
    fn test_zero_epoch_tick_is_clamped() {
        let config = EngineConfig {
            epoch_tick_ms: 0,
            ..Default::default()
        };

        assert_eq!(config.epoch_tick(), Duration::from_millis(1));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"max_instances": 500}, "actors": {"keep_alive_ms": 250}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        // Explicitly set values
        assert_eq!(config.engine.max_instances, 500);
        assert_eq!(config.actors.keep_alive_ms, 250);
        // Default values for unspecified fields
        assert!(config.engine.pooling_allocator);
        assert_eq!(config.actors.activation_timeout_ms, 100);
        assert_eq!(config.execution.max_fuel, 1_000_000_000);
    }
}
