//! Per-request execution context and store management.
//!
//! This module provides:
//! - [`WorkerContext`]: Per-request state, owning the WASI preview1 context
//! - [`SandboxIo`]: What a guest sees of the outside world (stdin, args, env)

use std::collections::HashMap;

use wasmtime::Store;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::pipe::{MemoryInputPipe, MemoryOutputPipe};
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use wasmfn_common::{ExecutionConfig, RuntimeError};

/// Process-level inputs handed to a guest.
#[derive(Debug, Clone, Default)]
pub struct SandboxIo {
    /// Bytes readable from fd 0.
    pub stdin: Vec<u8>,
    /// Program arguments, `argv[0]` included.
    pub args: Vec<String>,
    /// Environment variables, one `KEY=value` pair per entry.
    pub env: HashMap<String, String>,
}

/// Per-request execution context.
///
/// Created for each request and dropped once its output is collected.
/// Stdout is captured in memory, stderr is inherited from the host.
pub struct WorkerContext {
    wasi: WasiP1Ctx,

    stdout: MemoryOutputPipe,

    /// Correlation id of the request being executed.
    pub request_id: String,
}

impl WorkerContext {
    /// Create a context whose stdout holds at most `stdout_capacity` bytes.
    pub fn new(request_id: String, io: SandboxIo, stdout_capacity: usize) -> Self {
        let stdout = MemoryOutputPipe::new(stdout_capacity);

        let mut builder = WasiCtxBuilder::new();
        builder
            .stdin(MemoryInputPipe::new(io.stdin))
            .stdout(stdout.clone())
            .inherit_stderr()
            .args(io.args.as_slice());
        for (key, value) in &io.env {
            builder.env(key, value);
        }

        Self {
            wasi: builder.build_p1(),
            stdout,
            request_id,
        }
    }

    /// Accessor handed to the WASI linker.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Everything the guest has written to stdout so far.
    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.contents().to_vec()
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Create a new Wasmtime store for one request.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    request_id: String,
    io: SandboxIo,
) -> Result<Store<WorkerContext>, RuntimeError> {
    let context = WorkerContext::new(request_id, io, config.stdout_capacity_bytes);
    let mut store = Store::new(engine.inner(), context);

    if config.fuel_metering {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
        // Yield to the executor every 10M units of fuel.
        store
            .fuel_async_yield_interval(Some(10_000_000))
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set yield interval: {e}")))?;
    } else {
        // The engine always meters fuel; an unmetered store gets an unbounded tank.
        store
            .set_fuel(u64::MAX)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    if engine.config().epoch_interruption {
        store.set_epoch_deadline(engine.ticks_for(config.timeout()));
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<WorkerContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<WorkerContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
