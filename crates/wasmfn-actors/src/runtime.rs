//! The execution actor.
//!
//! A [`Runtime`] owns one deployment's compiled module and serves wire
//! requests for it strictly one at a time. It is activated lazily by the
//! [`RuntimeManager`](crate::RuntimeManager), binds its deployment on the
//! first request, and stops itself after the keep-alive window passes with
//! no traffic.
//!
//! ```text
//!             first request ok
//!   Idle ─────────────────────────▶ Ready
//!    │  ▲ init failed (500)            │ keep-alive expired / shutdown
//!    └──┘                              ▼
//!                                 Terminating
//! ```
//!
//! Every request a runtime accepts gets exactly one [`WireResponse`], whether
//! the guest succeeds, fails, or the runtime is stopping.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use wasmfn_common::{Deployment, MetricStore, RequestMetric, RuntimeError, Store};
use wasmfn_core::{
    CompiledModule, InterpreterImages, ModCacher, Sandbox, SandboxExecutor, WireRequest,
    WireResponse,
};

use crate::error::MailboxClosed;
use crate::manager::ManagerPid;

/// Messages a runtime accepts.
#[derive(Debug)]
pub enum RuntimeMessage {
    /// Execute a request and send the response to `reply_to`.
    Request {
        request: Box<WireRequest>,
        reply_to: mpsc::UnboundedSender<WireResponse>,
    },
    /// Stop after answering everything already queued.
    Shutdown,
}

/// Address of a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimePid {
    id: Uuid,
    tx: mpsc::UnboundedSender<RuntimeMessage>,
    held: Weak<()>,
}

/// Receiving end of a [`RuntimePid`].
///
/// The address counts as finished only once its mailbox is dropped, so a
/// runtime that closed its mailbox and is still answering queued requests
/// is not yet replaceable.
#[derive(Debug)]
pub struct RuntimeMailbox {
    rx: mpsc::UnboundedReceiver<RuntimeMessage>,
    _held: Arc<()>,
}

impl RuntimeMailbox {
    pub async fn recv(&mut self) -> Option<RuntimeMessage> {
        self.rx.recv().await
    }

    /// Refuse new messages. Those already queued can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl RuntimePid {
    /// A fresh address and the mailbox it delivers to.
    ///
    /// [`Cluster`](crate::Cluster) implementations that run actors outside
    /// [`Runtime::spawn`] use this to hand out addresses.
    pub fn channel() -> (Self, RuntimeMailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let held = Arc::new(());
        let pid = Self {
            id: Uuid::new_v4(),
            tx,
            held: Arc::downgrade(&held),
        };
        (pid, RuntimeMailbox { rx, _held: held })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns `false` once the runtime has stopped accepting messages.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Returns `true` once the mailbox is gone and nothing queued on it can
    /// still execute.
    pub fn is_finished(&self) -> bool {
        self.held.strong_count() == 0
    }

    /// Queue `request` on the runtime's mailbox.
    ///
    /// # Errors
    ///
    /// Returns the request inside [`MailboxClosed`] if the runtime has
    /// stopped.
    pub fn send(
        &self,
        request: WireRequest,
        reply_to: mpsc::UnboundedSender<WireResponse>,
    ) -> Result<(), MailboxClosed> {
        let message = RuntimeMessage::Request {
            request: Box::new(request),
            reply_to,
        };
        if let Err(mpsc::error::SendError(RuntimeMessage::Request { request, .. })) =
            self.tx.send(message)
        {
            return Err(MailboxClosed {
                pid: self.id,
                request,
            });
        }
        Ok(())
    }

    /// Ask the runtime to stop. Requests already queued are still answered.
    pub fn shutdown(&self) {
        let _ = self.tx.send(RuntimeMessage::Shutdown);
    }
}

/// Collaborators shared by every runtime on a node.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub store: Arc<dyn Store>,
    pub metrics: Arc<dyn MetricStore>,
    pub cache: Arc<dyn ModCacher>,
    pub executor: Arc<SandboxExecutor>,
    pub interpreters: InterpreterImages,
    pub keep_alive: Duration,
}

/// A deployment bound to a runtime.
struct Loaded {
    deployment: Arc<Deployment>,
    sandbox: Sandbox,
    module: CompiledModule,
}

enum State {
    Idle,
    Ready(Loaded),
    Terminating,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ready(_) => "ready",
            Self::Terminating => "terminating",
        }
    }
}

/// Execution actor for one deployment.
pub struct Runtime {
    id: Uuid,
    key: String,
    manager: ManagerPid,
    deps: RuntimeDeps,
    state: State,
}

impl Runtime {
    /// Start a runtime for `key` on the current tokio runtime.
    pub fn spawn(key: String, manager: ManagerPid, deps: RuntimeDeps) -> RuntimePid {
        let (pid, rx) = RuntimePid::channel();

        let span = info_span!("runtime", runtime_id = %pid.id, key = %key);
        let runtime = Self {
            id: pid.id,
            key,
            manager,
            deps,
            state: State::Idle,
        };
        tokio::spawn(runtime.run(rx).instrument(span));

        pid
    }

    async fn run(mut self, mut rx: RuntimeMailbox) {
        debug!("Runtime started");
        let keep_alive = self.deps.keep_alive;
        let idle = sleep(keep_alive);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(RuntimeMessage::Request { request, reply_to }) => {
                        self.serve(*request, &reply_to).await;
                        idle.as_mut().reset(tokio::time::Instant::now() + keep_alive);
                    }
                    Some(RuntimeMessage::Shutdown) | None => break,
                },
                () = &mut idle => {
                    debug!(keep_alive_ms = keep_alive.as_millis(), "Keep-alive expired");
                    break;
                }
            }
        }

        self.stop(rx).await;
    }

    /// Answer whatever is still queued, then leave the directory.
    ///
    /// The manager holds back lookups for this key until the removal
    /// arrives, so no successor runs while the queue drains.
    async fn stop(mut self, mut rx: RuntimeMailbox) {
        rx.close();

        let mut drained = 0usize;
        while let Some(message) = rx.recv().await {
            if let RuntimeMessage::Request { request, reply_to } = message {
                self.serve(*request, &reply_to).await;
                drained += 1;
            }
        }

        self.state = State::Terminating;
        self.manager.remove_runtime(self.key.clone(), self.id);
        info!(drained, state = self.state.name(), "Runtime stopped");
    }

    async fn serve(&mut self, request: WireRequest, reply_to: &mpsc::UnboundedSender<WireResponse>) {
        let response = self.handle(request).await;
        if reply_to.send(response).is_err() {
            debug!("Requester went away before the response was sent");
        }
    }

    async fn handle(&mut self, request: WireRequest) -> WireResponse {
        if matches!(self.state, State::Idle) {
            match self.initialize(&request).await {
                Ok(loaded) => {
                    info!(
                        deployment_id = %loaded.deployment.id,
                        endpoint_id = %loaded.deployment.endpoint_id,
                        "Runtime ready"
                    );
                    self.state = State::Ready(loaded);
                }
                Err(err) => {
                    warn!(request_id = %request.id, error = %err, "Runtime initialization failed");
                    return WireResponse::error(request.id, 500, "internal server error");
                }
            }
        }

        let State::Ready(loaded) = &self.state else {
            return WireResponse::error(request.id, 500, "runtime is terminating");
        };

        if request.deployment_id != loaded.deployment.id.to_string() {
            warn!(
                request_id = %request.id,
                requested = %request.deployment_id,
                bound = %loaded.deployment.id,
                "Request routed to a runtime bound to another deployment"
            );
            return WireResponse::error(request.id, 500, "internal server error");
        }

        invoke(&self.deps, loaded, request).await
    }

    /// Resolve the deployment, pick its sandbox and compile it.
    async fn initialize(&self, request: &WireRequest) -> Result<Loaded, RuntimeError> {
        let deployment_id = Uuid::parse_str(&request.deployment_id).map_err(|_| {
            RuntimeError::invalid_config(format!(
                "invalid deployment id '{}'",
                request.deployment_id
            ))
        })?;
        let kind = request.runtime_kind().ok_or_else(|| {
            RuntimeError::invalid_config(format!("unknown runtime '{}'", request.runtime))
        })?;

        let deployment = self.deps.store.get_deployment(deployment_id)?;
        let sandbox = Sandbox::select(kind, &deployment.blob, &self.deps.interpreters)?;

        let endpoint_id = deployment.endpoint_id;
        // Registered before compiling; a publish that deletes the entry
        // meanwhile only orphans this handle.
        let cache = self.deps.cache.get_or_insert(endpoint_id);

        let module = {
            let executor = Arc::clone(&self.deps.executor);
            let sandbox = sandbox.clone();
            tokio::task::spawn_blocking(move || executor.compile(&cache, &sandbox))
                .await
                .map_err(|err| RuntimeError::compilation_failed(err.to_string()))??
        };

        Ok(Loaded {
            deployment,
            sandbox,
            module,
        })
    }
}

/// Run one request against a bound deployment and record its metric.
async fn invoke(deps: &RuntimeDeps, loaded: &Loaded, request: WireRequest) -> WireResponse {
    let start_time = Utc::now();
    let started = Instant::now();
    let result = deps
        .executor
        .execute(&loaded.module, &loaded.sandbox, &request)
        .await;
    let duration = started.elapsed();
    let end_time = Utc::now();

    let response = match result {
        Ok(output) => {
            for line in output.logs_lossy().lines() {
                debug!(guest_log = true, request_id = %request.id, "{line}");
            }
            let status = i32::try_from(output.status).unwrap_or(500);
            WireResponse::new(request.id.clone(), status, output.body)
        }
        Err(err) => {
            warn!(request_id = %request.id, error = %err, "Execution failed");
            WireResponse::error(request.id.clone(), status_for_error(&err), &err.to_string())
        }
    };

    if !request.preview {
        let metric = RequestMetric {
            id: request.id,
            endpoint_id: loaded.deployment.endpoint_id,
            deployment_id: loaded.deployment.id,
            request_url: request.url,
            status_code: u32::try_from(response.status_code).unwrap_or_default(),
            start_time,
            end_time,
            duration,
        };
        if let Err(err) = deps.metrics.create_request_metric(metric) {
            warn!(error = %err, "Failed to record request metric");
        }
    }

    response
}

/// HTTP status reported for a failed execution.
pub fn status_for_error(err: &RuntimeError) -> i32 {
    match err {
        RuntimeError::ExecutionTimeout { .. } => 504,
        _ => 500,
    }
}
