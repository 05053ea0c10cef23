//! WebAssembly instance lifecycle management.
//!
//! This module provides [`InstanceRunner`], which handles the complete lifecycle
//! of executing a WASI command module:
//!
//! 1. Link WASI preview1 imports
//! 2. Instantiate the module with a fresh store
//! 3. Run `_start`
//! 4. Classify how the guest stopped

use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{Engine, Linker, Store, Trap};
use wasmtime_wasi::I32Exit;

use crate::CompiledModule;
use crate::store::{WorkerContext, calculate_fuel_consumed, get_remaining_fuel};
use wasmfn_common::{RuntimeError, WasiError};

/// WASI command entry point.
pub const ENTRY_POINT: &str = "_start";

/// How a guest execution ended.
#[derive(Debug)]
pub enum ExecutionResult {
    /// `_start` returned, or the guest called `proc_exit(0)`.
    Success,

    /// The guest called `proc_exit` with a non-zero code.
    Exit {
        code: i32,
    },

    /// Execution completed with a trap (runtime error).
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },
}

/// Instance lifecycle manager.
///
/// Holds a linker with the WASI preview1 imports registered. Each execution
/// uses its own [`Store`] for isolation.
pub struct InstanceRunner {
    linker: Linker<WorkerContext>,
}

impl InstanceRunner {
    /// Create a new instance runner with WASI preview1 linked.
    ///
    /// # Errors
    ///
    /// Returns an error if the WASI imports cannot be registered.
    pub fn new(engine: &Engine) -> Result<Self, RuntimeError> {
        let mut linker = Linker::new(engine);
        wasmtime_wasi::preview1::add_to_linker_async(&mut linker, WorkerContext::wasi_mut)
            .map_err(|e| WasiError::InitializationFailed {
                reason: format!("Failed to link WASI preview1: {e}"),
            })?;

        Ok(Self { linker })
    }

    /// Instantiate `module` and run its `_start` export.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Instantiation fails
    /// - `_start` is not exported
    /// - Fuel is exhausted
    /// - The epoch deadline is reached
    #[instrument(skip(self, module, store), fields(request_id = %store.data().request_id))]
    pub async fn execute(
        &self,
        module: &CompiledModule,
        store: &mut Store<WorkerContext>,
    ) -> Result<ExecutionResult, RuntimeError> {
        let start = Instant::now();
        let initial_fuel = get_remaining_fuel(store).unwrap_or(0);

        let instance = self
            .linker
            .instantiate_async(&mut *store, module.module())
            .await
            .map_err(|e| RuntimeError::instantiation_failed(e.to_string()))?;

        let func = instance
            .get_typed_func::<(), ()>(&mut *store, ENTRY_POINT)
            .map_err(|_| {
                RuntimeError::module_not_found(format!("Entry point '{ENTRY_POINT}' not found"))
            })?;

        debug!("Executing entry point");

        let result = func.call_async(&mut *store, ()).await;

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, store);
        let duration = start.elapsed();

        let error = match result {
            Ok(()) => {
                info!(
                    duration_ms = duration.as_millis(),
                    fuel_consumed, "Execution completed successfully"
                );
                return Ok(ExecutionResult::Success);
            }
            Err(error) => error,
        };

        if let Some(exit) = error.downcast_ref::<I32Exit>() {
            info!(
                duration_ms = duration.as_millis(),
                fuel_consumed,
                exit_code = exit.0,
                "Guest exited"
            );
            return Ok(if exit.0 == 0 {
                ExecutionResult::Success
            } else {
                ExecutionResult::Exit { code: exit.0 }
            });
        }

        match error.downcast_ref::<Trap>() {
            Some(Trap::OutOfFuel) => {
                warn!(
                    duration_ms = duration.as_millis(),
                    fuel_consumed, "Execution terminated: fuel exhausted"
                );
                Err(RuntimeError::FuelExhausted)
            }
            Some(Trap::Interrupt) => {
                warn!(
                    duration_ms = duration.as_millis(),
                    "Execution terminated: deadline reached"
                );
                Err(RuntimeError::ExecutionTimeout {
                    duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                })
            }
            _ => {
                let (message, code) = extract_trap_info(&error);
                warn!(
                    duration_ms = duration.as_millis(),
                    fuel_consumed,
                    trap_message = %message,
                    "Execution trapped"
                );
                Ok(ExecutionResult::Trap { message, code })
            }
        }
    }
}

/// Extract human-readable trap information.
fn extract_trap_info(error: &wasmtime::Error) -> (String, Option<String>) {
    let message = error.to_string();
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));

    (message, code)
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner").finish_non_exhaustive()
    }
}
