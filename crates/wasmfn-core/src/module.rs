//! WebAssembly module compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's
//! [`Module`] carrying the content hash of its source. Deployments may be
//! submitted as binary WebAssembly or as WAT text.

use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::{Engine, Module};

use wasmfn_common::{RuntimeError, content_hash};

const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// A compiled WebAssembly module.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and can be shared across tasks. The
/// underlying Wasmtime module is reference counted.
#[derive(Clone)]
pub struct CompiledModule {
    module: Module,

    /// SHA-256 of the source bytes, hex encoded.
    content_hash: String,

    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a module from binary WebAssembly or WAT text.
    ///
    /// Sources starting with the WebAssembly magic number are treated as
    /// binary and must carry a full header. Anything else is parsed as WAT.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    pub fn from_source(engine: &Engine, source: &[u8]) -> Result<Self, RuntimeError> {
        if source.starts_with(WASM_MAGIC) {
            Self::from_bytes(engine, source)
        } else {
            let wat = std::str::from_utf8(source).map_err(|_| {
                RuntimeError::compilation_failed(
                    "Invalid module: neither WebAssembly binary nor UTF-8 WAT text",
                )
            })?;
            Self::from_wat(engine, wat)
        }
    }

    /// Compile a core module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or compilation fails.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            RuntimeError::compilation_failed(format!("Core module compilation failed: {e}"))
        })?;

        Ok(Self::finish(module, bytes, start))
    }

    /// Compile a core module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or compilation fails.
    #[instrument(skip(engine, wat), fields(bytes_len = wat.len()))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat).map_err(|e| {
            RuntimeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        Ok(Self::finish(module, wat.as_bytes(), start))
    }

    fn finish(module: Module, source: &[u8], start: Instant) -> Self {
        let content_hash = content_hash(source);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Self {
            module,
            content_hash,
            compiled_at: Instant::now(),
        }
    }

    /// Get the content hash of the source bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        if &bytes[0..4] != WASM_MAGIC {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use wasmfn_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_validate_wasm_header_valid() {
        assert!(CompiledModule::validate_wasm_header(MINIMAL_WASM).is_ok());
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        let result = CompiledModule::validate_wasm_header(&[0x00, 0x61]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_wasm_header_bad_magic() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let result = CompiledModule::validate_wasm_header(bad_wasm);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_source_binary() {
        let engine = engine();
        let module = CompiledModule::from_source(engine.inner(), MINIMAL_WASM).unwrap();

        assert_eq!(module.content_hash(), content_hash(MINIMAL_WASM));
    }

    #[test]
    fn test_from_source_wat() {
        let engine = engine();
        let wat = b"(module (func (export \"_start\")))";
        let module = CompiledModule::from_source(engine.inner(), wat).unwrap();

        assert!(module.module().get_export("_start").is_some());
    }

    #[test]
    fn test_from_source_truncated_binary() {
        let engine = engine();
        let result = CompiledModule::from_source(engine.inner(), b"\0asm");

        assert!(matches!(
            result,
            Err(RuntimeError::CompilationFailed { .. })
        ));
    }

    #[test]
    fn test_from_source_garbage() {
        let engine = engine();

        assert!(CompiledModule::from_source(engine.inner(), &[0xff, 0xfe, 0x00]).is_err());
        assert!(CompiledModule::from_source(engine.inner(), b"not a module").is_err());
    }

    #[test]
    fn test_module_debug() {
        let engine = engine();
        let module = CompiledModule::from_bytes(engine.inner(), MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("CompiledModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
