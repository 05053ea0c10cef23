//! Common types, errors, and collaborators for wasmfn.
//!
//! This crate provides shared functionality used across the wasmfn workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for engine, execution and actor settings
//! - The endpoint/deployment data model
//! - Storage and metrics collaborator traits with in-memory implementations

pub mod config;
pub mod config_file;
pub mod error;
pub mod storage;
pub mod types;

pub use config::{ActorConfig, EngineConfig, ExecutionConfig, RuntimeConfig, SandboxConfig};
pub use error::{RuntimeError, StorageError, WasiError, WireError};
pub use storage::{MemoryMetricStore, MemoryStore, MetricStore, Store, UpdateEndpointParams};
pub use types::{Deployment, Endpoint, ParseRuntimeKindError, RequestMetric, RuntimeKind, content_hash};
