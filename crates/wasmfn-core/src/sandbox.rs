//! Runtime-kind dispatch and single-request sandbox execution.
//!
//! A [`Sandbox`] decides what code runs for a deployment and with which
//! arguments. Native deployments run their own blob. Interpreted deployments
//! run a shared interpreter image with the script passed as `-e <script>`.
//! Everything downstream (caching, codec, execution) is identical.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use wasmfn_common::{ExecutionConfig, RuntimeError, RuntimeKind, SandboxConfig};

use crate::cache::CompilationCache;
use crate::instance::{ExecutionResult, InstanceRunner};
use crate::store::{SandboxIo, create_store};
use crate::wire::{SandboxOutput, TrailerFormat, WireRequest, decode_output};
use crate::{CompiledModule, WasmEngine};

/// Interpreter images for scripted runtime kinds.
#[derive(Debug, Clone, Default)]
pub struct InterpreterImages {
    js: Option<Arc<[u8]>>,
}

impl InterpreterImages {
    /// Load the images named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured image cannot be read.
    pub fn from_config(config: &SandboxConfig) -> Result<Self, RuntimeError> {
        let js = config
            .js_interpreter_path
            .as_deref()
            .map(Self::read_image)
            .transpose()?;
        Ok(Self { js })
    }

    /// Use `image` as the JavaScript interpreter.
    #[must_use]
    pub fn with_js(mut self, image: impl Into<Arc<[u8]>>) -> Self {
        self.js = Some(image.into());
        self
    }

    /// The interpreter image for `kind`, if it needs and has one.
    pub fn get(&self, kind: RuntimeKind) -> Option<&Arc<[u8]>> {
        match kind {
            RuntimeKind::Go => None,
            RuntimeKind::Js => self.js.as_ref(),
        }
    }

    fn read_image(path: &Path) -> Result<Arc<[u8]>, RuntimeError> {
        let image = std::fs::read(path)?;
        info!(path = %path.display(), bytes = image.len(), "Interpreter image loaded");
        Ok(image.into())
    }
}

/// The code a deployment runs, selected once per actor.
#[derive(Debug, Clone)]
pub enum Sandbox {
    /// A WebAssembly module run directly.
    Native { blob: Arc<[u8]> },
    /// A script run inside an interpreter image.
    Interpreted {
        interpreter: Arc<[u8]>,
        script: String,
    },
}

impl Sandbox {
    /// Select the sandbox for a deployment blob of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InterpreterUnavailable`] if `kind` needs an
    /// interpreter that is not loaded, or [`RuntimeError::CompilationFailed`]
    /// if a script is not valid UTF-8.
    pub fn select(
        kind: RuntimeKind,
        blob: &[u8],
        interpreters: &InterpreterImages,
    ) -> Result<Self, RuntimeError> {
        match kind {
            RuntimeKind::Go => Ok(Self::Native { blob: blob.into() }),
            RuntimeKind::Js => {
                let interpreter = interpreters.get(kind).cloned().ok_or_else(|| {
                    RuntimeError::InterpreterUnavailable {
                        runtime: kind.to_string(),
                    }
                })?;
                let script = String::from_utf8(blob.to_vec()).map_err(|_| {
                    RuntimeError::compilation_failed("Script is not valid UTF-8")
                })?;
                Ok(Self::Interpreted {
                    interpreter,
                    script,
                })
            }
        }
    }

    /// The WebAssembly source to compile.
    pub fn code(&self) -> &[u8] {
        match self {
            Self::Native { blob } => blob,
            Self::Interpreted { interpreter, .. } => interpreter,
        }
    }

    /// Program arguments, `argv[0]` included.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Native { .. } => Vec::new(),
            Self::Interpreted { script, .. } => {
                vec![String::new(), "-e".to_string(), script.clone()]
            }
        }
    }

    /// Trailer layout the guest writes.
    pub fn trailer_format(&self) -> TrailerFormat {
        match self {
            Self::Native { .. } => TrailerFormat::Raw,
            Self::Interpreted { .. } => TrailerFormat::Hex,
        }
    }
}

/// Compiles and runs sandboxes against one shared engine.
#[derive(Debug)]
pub struct SandboxExecutor {
    engine: WasmEngine,
    runner: InstanceRunner,
    config: ExecutionConfig,
}

impl SandboxExecutor {
    /// # Errors
    ///
    /// Returns an error if the WASI imports cannot be linked.
    pub fn new(engine: WasmEngine, config: ExecutionConfig) -> Result<Self, RuntimeError> {
        let runner = InstanceRunner::new(engine.inner())?;
        Ok(Self {
            engine,
            runner,
            config,
        })
    }

    /// Compile the sandbox's code through `cache`.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails.
    pub fn compile(
        &self,
        cache: &CompilationCache,
        sandbox: &Sandbox,
    ) -> Result<CompiledModule, RuntimeError> {
        cache.get_or_compile(self.engine.inner(), sandbox.code())
    }

    /// Run one request through a compiled sandbox and decode its stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest traps, runs out of fuel or time, or
    /// writes output without a valid trailer.
    #[instrument(skip_all, fields(request_id = %request.id))]
    pub async fn execute(
        &self,
        module: &CompiledModule,
        sandbox: &Sandbox,
        request: &WireRequest,
    ) -> Result<SandboxOutput, RuntimeError> {
        let io = SandboxIo {
            stdin: request.to_stdin(),
            args: sandbox.args(),
            env: request.env.clone(),
        };
        let mut store = create_store(&self.engine, &self.config, request.id.clone(), io)?;

        match self.runner.execute(module, &mut store).await? {
            ExecutionResult::Trap { message, .. } => return Err(RuntimeError::trap(message)),
            // A failing exit still leaves its response on stdout.
            ExecutionResult::Exit { code } => debug!(code, "Guest exited with non-zero code"),
            ExecutionResult::Success => {}
        }

        let stdout = store.data().stdout();
        debug!(stdout_len = stdout.len(), "Guest finished");

        Ok(decode_output(&stdout, sandbox.trailer_format())?)
    }
}
