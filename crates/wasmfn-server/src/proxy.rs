//! Correlation proxy between HTTP handlers and execution actors.
//!
//! HTTP handlers never talk to runtimes directly. They register a request
//! with the [`WasmProxy`], which forwards it to the deployment's runtime with
//! the proxy's own inbox as return address. Responses coming back are matched
//! to waiting handlers by correlation ID alone.
//!
//! The pending map is owned by the proxy task, so registering, completing
//! and abandoning a request are serialized. Each entry is removed exactly
//! once: by its response, or by an abandon when the handler stops waiting.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info_span, warn};

use wasmfn_actors::ManagerPid;
use wasmfn_core::{WireRequest, WireResponse};

use crate::error::IngressError;

/// Attempts to deliver a request before giving up with 503.
const DELIVERY_ATTEMPTS: usize = 2;

/// Control messages for the proxy.
#[derive(Debug)]
pub enum ProxyMessage {
    /// Forward `request` and complete `respond_to` with its response.
    Register {
        request: Box<WireRequest>,
        respond_to: oneshot::Sender<WireResponse>,
    },
    /// The handler for `id` stopped waiting.
    Abandon { id: String },
    /// Number of requests still waiting for a response.
    Pending { reply: oneshot::Sender<usize> },
}

/// Handle used by HTTP handlers to invoke deployments through the proxy.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    tx: mpsc::UnboundedSender<ProxyMessage>,
    request_timeout: Duration,
}

impl ProxyHandle {
    /// Forward `request` and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns [`IngressError::Timeout`] if no response arrives before the
    /// request deadline, or [`IngressError::ProxyUnavailable`] if the proxy
    /// has stopped.
    pub async fn invoke(&self, request: WireRequest) -> Result<WireResponse, IngressError> {
        let (respond_to, rx) = oneshot::channel();
        let guard = AbandonGuard {
            tx: self.tx.clone(),
            id: Some(request.id.clone()),
        };

        self.tx
            .send(ProxyMessage::Register {
                request: Box::new(request),
                respond_to,
            })
            .map_err(|_| IngressError::ProxyUnavailable)?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => {
                guard.disarm();
                Ok(response)
            }
            Ok(Err(_)) => Err(IngressError::ProxyUnavailable),
            Err(_) => Err(IngressError::Timeout {
                timeout_ms: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Number of requests registered but not yet answered or abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`IngressError::ProxyUnavailable`] if the proxy has stopped.
    pub async fn pending(&self) -> Result<usize, IngressError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ProxyMessage::Pending { reply })
            .map_err(|_| IngressError::ProxyUnavailable)?;
        rx.await.map_err(|_| IngressError::ProxyUnavailable)
    }
}

/// Sends [`ProxyMessage::Abandon`] unless the response was received.
///
/// Also covers handler futures dropped mid-wait, e.g. on client disconnect.
struct AbandonGuard {
    tx: mpsc::UnboundedSender<ProxyMessage>,
    id: Option<String>,
}

impl AbandonGuard {
    fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.tx.send(ProxyMessage::Abandon { id });
        }
    }
}

/// The correlation actor.
pub struct WasmProxy {
    pending: HashMap<String, oneshot::Sender<WireResponse>>,
    manager: ManagerPid,
    inbox: mpsc::UnboundedSender<WireResponse>,
    activation_timeout: Duration,
}

impl WasmProxy {
    /// Start the proxy on the current tokio runtime.
    pub fn spawn(
        manager: ManagerPid,
        activation_timeout: Duration,
        request_timeout: Duration,
    ) -> ProxyHandle {
        let (tx, control) = mpsc::unbounded_channel();
        let (inbox, responses) = mpsc::unbounded_channel();

        let proxy = Self {
            pending: HashMap::new(),
            manager,
            inbox,
            activation_timeout,
        };
        tokio::spawn(
            proxy
                .run(control, responses)
                .instrument(info_span!("wasm_proxy")),
        );

        ProxyHandle {
            tx,
            request_timeout,
        }
    }

    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<ProxyMessage>,
        mut responses: mpsc::UnboundedReceiver<WireResponse>,
    ) {
        loop {
            tokio::select! {
                message = control.recv() => match message {
                    Some(message) => self.on_control(message),
                    None => break,
                },
                Some(response) = responses.recv() => self.on_response(response),
            }
        }
        debug!(pending = self.pending.len(), "Proxy stopped");
    }

    fn on_control(&mut self, message: ProxyMessage) {
        match message {
            ProxyMessage::Register {
                request,
                respond_to,
            } => {
                if self.pending.contains_key(&request.id) {
                    warn!(request_id = %request.id, "Duplicate correlation ID");
                    let _ = respond_to.send(WireResponse::error(
                        request.id,
                        500,
                        "duplicate request id",
                    ));
                    return;
                }
                self.pending.insert(request.id.clone(), respond_to);

                let span = info_span!("dispatch", request_id = %request.id);
                tokio::spawn(
                    dispatch(
                        self.manager.clone(),
                        self.inbox.clone(),
                        *request,
                        self.activation_timeout,
                    )
                    .instrument(span),
                );
            }
            ProxyMessage::Abandon { id } => {
                if self.pending.remove(&id).is_some() {
                    debug!(request_id = %id, "Request abandoned");
                }
            }
            ProxyMessage::Pending { reply } => {
                let _ = reply.send(self.pending.len());
            }
        }
    }

    fn on_response(&mut self, response: WireResponse) {
        match self.pending.remove(&response.request_id) {
            Some(respond_to) => {
                if respond_to.send(response).is_err() {
                    debug!("Handler went away before the response arrived");
                }
            }
            None => debug!(
                request_id = %response.request_id,
                "Dropping response for an abandoned request"
            ),
        }
    }
}

/// Deliver `request` to its runtime, retrying once if the runtime stopped
/// between lookup and delivery.
///
/// Failures are reported as a 503 response on `reply_to`, so the proxy
/// completes the request through the same path as a sandbox response.
async fn dispatch(
    manager: ManagerPid,
    reply_to: mpsc::UnboundedSender<WireResponse>,
    mut request: WireRequest,
    activation_timeout: Duration,
) {
    let key = request.deployment_id.clone();

    for attempt in 1..=DELIVERY_ATTEMPTS {
        let pid = match manager.request_runtime(&key, activation_timeout).await {
            Ok(pid) => pid,
            Err(err) => {
                warn!(deployment_id = %key, error = %err, "Runtime unavailable");
                let _ = reply_to.send(WireResponse::error(request.id, 503, &err.to_string()));
                return;
            }
        };

        match pid.send(request, reply_to.clone()) {
            Ok(()) => return,
            Err(closed) => {
                debug!(attempt, runtime_id = %closed.pid, "Runtime stopped before delivery");
                request = *closed.request;
            }
        }
    }

    warn!(deployment_id = %key, "Runtime kept stopping, giving up");
    let _ = reply_to.send(WireResponse::error(request.id, 503, "runtime unavailable"));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use wasmfn_actors::{
        ActivationConfig, ActorError, Cluster, RuntimeMailbox, RuntimeManager, RuntimeMessage,
        RuntimePid,
    };

    const ACTIVATION: Duration = Duration::from_secs(1);

    /// Answers every request with its own URL as the body.
    #[derive(Default)]
    struct EchoCluster {
        activations: AtomicUsize,
        /// Number of activations that hand out an already-stopped runtime.
        dead_on_arrival: usize,
    }

    impl Cluster for EchoCluster {
        fn activate(&self, _: &str, _: ActivationConfig) -> Result<RuntimePid, ActorError> {
            let n = self.activations.fetch_add(1, Ordering::SeqCst);
            let (pid, mut rx) = RuntimePid::channel();
            if n < self.dead_on_arrival {
                return Ok(pid);
            }
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    if let RuntimeMessage::Request { request, reply_to } = message {
                        let body = request.url.clone().into_bytes();
                        let _ = reply_to.send(WireResponse::new(request.id, 200, body));
                    }
                }
            });
            Ok(pid)
        }
    }

    /// Accepts requests and never answers.
    #[derive(Default)]
    struct SilentCluster {
        mailboxes: std::sync::Mutex<Vec<RuntimeMailbox>>,
    }

    impl Cluster for SilentCluster {
        fn activate(&self, _: &str, _: ActivationConfig) -> Result<RuntimePid, ActorError> {
            let (pid, rx) = RuntimePid::channel();
            self.mailboxes.lock().unwrap().push(rx);
            Ok(pid)
        }
    }

    struct RefusingCluster;

    impl Cluster for RefusingCluster {
        fn activate(&self, _: &str, _: ActivationConfig) -> Result<RuntimePid, ActorError> {
            Err(ActorError::ActivationFailed {
                reason: "no capacity".into(),
            })
        }
    }

    fn request(id: &str, deployment: &str) -> WireRequest {
        WireRequest {
            id: id.to_string(),
            url: format!("/{id}"),
            deployment_id: deployment.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_request_resolved_once() {
        let manager = RuntimeManager::spawn(Arc::new(EchoCluster::default()));
        let proxy = WasmProxy::spawn(manager, ACTIVATION, Duration::from_secs(5));

        let mut tasks = Vec::new();
        for i in 0..50 {
            let proxy = proxy.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("req-{i}");
                let response = proxy
                    .invoke(request(&id, &format!("d{}", i % 3)))
                    .await
                    .unwrap();
                (id, response)
            }));
        }

        for task in tasks {
            let (id, response) = task.await.unwrap();
            assert_eq!(response.request_id, id);
            assert_eq!(response.status_code, 200);
            assert_eq!(response.response, format!("/{id}").into_bytes());
        }
        assert_eq!(proxy.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_abandons_entry() {
        let manager = RuntimeManager::spawn(Arc::new(SilentCluster::default()));
        let proxy = WasmProxy::spawn(manager, ACTIVATION, Duration::from_millis(50));

        let err = proxy.invoke(request("req-1", "d1")).await.unwrap_err();

        assert!(matches!(err, IngressError::Timeout { timeout_ms: 50 }));
        assert_eq!(proxy.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_handler_abandons_entry() {
        let manager = RuntimeManager::spawn(Arc::new(SilentCluster::default()));
        let proxy = WasmProxy::spawn(manager, ACTIVATION, Duration::from_secs(5));

        let waiting = tokio::time::timeout(
            Duration::from_millis(20),
            proxy.invoke(request("req-1", "d1")),
        )
        .await;
        assert!(waiting.is_err());

        assert_eq!(proxy.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_activation_failure_is_503() {
        let manager = RuntimeManager::spawn(Arc::new(RefusingCluster));
        let proxy = WasmProxy::spawn(manager, ACTIVATION, Duration::from_secs(5));

        let response = proxy.invoke(request("req-1", "d1")).await.unwrap();

        assert_eq!(response.request_id, "req-1");
        assert_eq!(response.status_code, 503);
        assert_eq!(proxy.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retries_stopped_runtime_once() {
        let cluster = Arc::new(EchoCluster {
            dead_on_arrival: 1,
            ..Default::default()
        });
        let manager = RuntimeManager::spawn(cluster.clone());
        let proxy = WasmProxy::spawn(manager, ACTIVATION, Duration::from_secs(5));

        let response = proxy.invoke(request("req-1", "d1")).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(cluster.activations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_second_stopped_runtime() {
        let cluster = Arc::new(EchoCluster {
            dead_on_arrival: 2,
            ..Default::default()
        });
        let manager = RuntimeManager::spawn(cluster.clone());
        let proxy = WasmProxy::spawn(manager, ACTIVATION, Duration::from_secs(5));

        let response = proxy.invoke(request("req-1", "d1")).await.unwrap();

        assert_eq!(response.status_code, 503);
        assert_eq!(cluster.activations.load(Ordering::SeqCst), 2);
    }
}
