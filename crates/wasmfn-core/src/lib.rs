//! Core Wasmtime runtime for wasmfn.
//!
//! This crate provides the WebAssembly execution capabilities the actors build on:
//! - [`WasmEngine`]: Configured Wasmtime engine with pooling allocator and epoch ticker
//! - [`CompilationCache`] and [`ModCacher`]: Compiled modules shared per endpoint
//! - [`Sandbox`]: Runtime-kind dispatch (native module or interpreter + script)
//! - [`SandboxExecutor`]: Runs one request in a fresh WASI store
//! - [`wire`]: Request encoding and stdout trailer decoding
//! - [`publish`]: Publishing and rolling back deployments
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared across all actors, thread-safe)                │
//! │  - Pooling Allocator                                    │
//! │  - Fuel + epoch interruption                            │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           CompilationCache (per endpoint)               │
//! │  - content hash → CompiledModule, append-only           │
//! │  - deleted on publish / rollback                        │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<WorkerContext> + Instance              │
//! │  (Per-request, isolated)                                │
//! │  - WireRequest on stdin, env from the endpoint          │
//! │  - stdout captured and decoded into SandboxOutput       │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod engine;
pub mod instance;
pub mod module;
pub mod publish;
pub mod sandbox;
pub mod store;
pub mod wire;

pub use cache::{CompilationCache, DefaultModCache, ModCacher};
pub use engine::{EpochTicker, WasmEngine};
pub use instance::{ExecutionResult, InstanceRunner};
pub use module::CompiledModule;
pub use publish::{PublishError, publish_deployment, rollback_deployment};
pub use sandbox::{InterpreterImages, Sandbox, SandboxExecutor};
pub use store::{SandboxIo, WorkerContext};
pub use wire::{HeaderFields, SandboxOutput, TrailerFormat, WireRequest, WireResponse};
