//! Error types for wasmfn.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for compiling and executing deployments
//! - [`StorageError`]: Errors reported by the storage and metrics collaborators
//! - [`WireError`]: Errors crossing the sandbox boundary
//! - [`WasiError`]: WASI-related errors

use std::io;

use thiserror::Error;
use uuid::Uuid;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur during the lifecycle of
/// executing a deployment, from resolving its blob to decoding its output.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The requested module or export was not found.
    #[error("Module not found: {module_id}")]
    ModuleNotFound {
        /// The identifier of the module that was not found.
        module_id: String,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// A compiled module could not be instantiated, e.g. an unsatisfied
    /// import or a memory the pool cannot hold.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// Execution exceeded the configured timeout.
    #[error("Execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// Execution exhausted the configured fuel limit.
    ///
    /// This indicates the WebAssembly code consumed more CPU cycles
    /// than allowed by the fuel metering configuration.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// The runtime kind needs an interpreter image that is not loaded.
    #[error("No interpreter image loaded for runtime '{runtime}'")]
    InterpreterUnavailable {
        /// The runtime kind that was requested.
        runtime: String,
    },

    /// A storage collaborator call failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The sandbox produced output that could not be decoded.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// WASI operation failed.
    #[error("WASI error: {0}")]
    Wasi(#[from] WasiError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors reported by the storage and metrics collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No endpoint exists with the given id.
    #[error("could not find endpoint with id ({id})")]
    EndpointNotFound {
        /// The endpoint id that was looked up.
        id: Uuid,
    },

    /// No deployment exists with the given id.
    #[error("could not find deployment with id ({id})")]
    DeploymentNotFound {
        /// The deployment id that was looked up.
        id: Uuid,
    },

    /// The backing store failed.
    #[error("storage backend failure: {reason}")]
    Backend {
        /// Description of the failure.
        reason: String,
    },
}

/// Errors crossing the sandbox boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The captured output does not end in a valid trailer.
    #[error("malformed sandbox output: {reason}")]
    MalformedOutput {
        /// Description of what was wrong with the output.
        reason: String,
    },

    /// A wire message could not be decoded.
    #[error("invalid wire message: {reason}")]
    InvalidMessage {
        /// Description of the decoding failure.
        reason: String,
    },
}

/// WASI-related errors.
///
/// These errors occur when WASI (WebAssembly System Interface) setup fails.
#[derive(Error, Debug)]
pub enum WasiError {
    /// Failed to initialize WASI context or link its imports.
    #[error("WASI initialization failed: {reason}")]
    InitializationFailed {
        /// Description of the initialization failure.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `ModuleNotFound` error.
    pub fn module_not_found(module_id: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            module_id: module_id.into(),
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates something was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ModuleNotFound { .. }
                | Self::Storage(
                    StorageError::EndpointNotFound { .. } | StorageError::DeploymentNotFound { .. }
                )
        )
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::ExecutionTimeout { .. })
    }
}

impl WireError {
    /// Create a new `MalformedOutput` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::module_not_found("test-module");
        assert_eq!(err.to_string(), "Module not found: test-module");

        let err = RuntimeError::FuelExhausted;
        assert_eq!(err.to_string(), "Fuel exhausted: CPU limit exceeded");

        let err = RuntimeError::instantiation_failed("unknown import");
        assert_eq!(err.to_string(), "Instantiation failed: unknown import");
    }

    #[test]
    fn test_error_from_storage() {
        let id = Uuid::nil();
        let runtime_err: RuntimeError = StorageError::DeploymentNotFound { id }.into();

        assert!(matches!(runtime_err, RuntimeError::Storage(_)));
        assert!(runtime_err.is_not_found());
    }

    #[test]
    fn test_is_resource_limit() {
        assert!(RuntimeError::FuelExhausted.is_resource_limit());
        assert!(RuntimeError::ExecutionTimeout { duration_ms: 100 }.is_resource_limit());
        assert!(!RuntimeError::module_not_found("test").is_resource_limit());
    }

    #[test]
    fn test_is_not_found() {
        assert!(RuntimeError::module_not_found("test").is_not_found());
        assert!(!RuntimeError::FuelExhausted.is_not_found());
        assert!(
            !RuntimeError::from(StorageError::Backend {
                reason: "down".into()
            })
            .is_not_found()
        );
    }

    #[test]
    fn test_wire_error_display() {
        let err = WireError::malformed("missing trailer");
        assert_eq!(err.to_string(), "malformed sandbox output: missing trailer");
    }
}
