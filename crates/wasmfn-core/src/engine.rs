//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is shared by every execution actor. It is:
//! - Thread-safe and free of per-request state
//! - Configured with pooling allocator for fast instantiation
//! - Set up with fuel metering and epoch interruption for resource limiting
//!
//! Epoch interruption needs a clock. [`WasmEngine::start_epoch_ticker`]
//! spawns the task that advances it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use wasmfn_common::{EngineConfig, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
///
/// # Configuration
///
/// - **Pooling Allocator**: Pre-allocates memory for instances, reducing
///   instantiation time from ~1ms to ~10µs
/// - **Fuel Metering**: Enables deterministic CPU limiting
/// - **Epoch Interruption**: Bounds wall-clock time of a guest
/// - **Async Support**: Guests run on the actor's task without blocking the executor
///
/// # Example
///
/// ```ignore
/// use wasmfn_common::EngineConfig;
/// use wasmfn_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// let _ticker = engine.start_epoch_ticker();
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The Wasmtime configuration is invalid
    /// - The pooling allocator cannot be initialized
    /// - The compiled artifact cache cannot be configured
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(true);
        wasmtime_config.consume_fuel(true);

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        if config.cache_compiled_modules {
            match config.cache_dir {
                Some(ref cache_config) => {
                    wasmtime_config.cache_config_load(cache_config).map_err(|e| {
                        RuntimeError::invalid_config(format!(
                            "Failed to load cache config '{cache_config}': {e}"
                        ))
                    })?;
                }
                None => {
                    wasmtime_config.cache_config_load_default().map_err(|e| {
                        RuntimeError::invalid_config(format!("Failed to enable module cache: {e}"))
                    })?;
                }
            }
            debug!(cache_config = ?config.cache_dir, "Compiled artifact cache enabled");
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!("Wasmtime engine initialized");

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of epoch ticks that make up `timeout`.
    pub fn ticks_for(&self, timeout: Duration) -> u64 {
        let tick = self.config.epoch_tick().as_millis().max(1);
        u64::try_from(timeout.as_millis().div_ceil(tick)).unwrap_or(u64::MAX)
    }

    /// Spawn a task advancing the epoch once per `epoch_tick_ms`.
    ///
    /// Returns `None` when epoch interruption is disabled. The task stops
    /// when the returned ticker is dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_epoch_ticker(&self) -> Option<EpochTicker> {
        if !self.config.epoch_interruption {
            return None;
        }

        let engine = Arc::clone(&self.engine);
        let period = self.config.epoch_tick();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                engine.increment_epoch();
            }
        });

        debug!(tick_ms = period.as_millis(), "Epoch ticker started");
        Some(EpochTicker { handle })
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("max_instances", &self.config.max_instances)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .finish_non_exhaustive()
    }
}

/// Background task driving epoch interruption. Aborted on drop.
#[derive(Debug)]
pub struct EpochTicker {
    handle: JoinHandle<()>,
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation_default() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config).unwrap();

        assert!(engine.config().pooling_allocator);
    }

    #[test]
    fn test_engine_creation_no_pooling() {
        let config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();

        assert!(!engine.config().pooling_allocator);
    }

    #[test]
    fn test_ticks_for_timeout() {
        let config = EngineConfig {
            pooling_allocator: false,
            epoch_tick_ms: 5,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();

        assert_eq!(engine.ticks_for(Duration::from_millis(100)), 20);
        assert_eq!(engine.ticks_for(Duration::from_millis(101)), 21);
        assert_eq!(engine.ticks_for(Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn test_epoch_ticker_disabled() {
        let config = EngineConfig {
            pooling_allocator: false,
            epoch_interruption: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();

        assert!(engine.start_epoch_ticker().is_none());
    }

    #[tokio::test]
    async fn test_epoch_ticker_runs() {
        let config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();

        let ticker = engine.start_epoch_ticker();
        assert!(ticker.is_some());
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(ticker);
    }

    #[test]
    fn test_engine_debug() {
        let config = EngineConfig::default();
        let engine = WasmEngine::new(&config).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("pooling_allocator"));
    }
}
