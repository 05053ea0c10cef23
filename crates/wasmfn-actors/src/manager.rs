//! The runtime directory.
//!
//! [`RuntimeManager`] maps deployment keys to live runtimes. It processes
//! one message at a time, so lookups and activations for the same key never
//! race: at most one runtime is registered per key at any moment.
//!
//! A runtime that has closed its mailbox but is still answering queued
//! requests stays registered. Lookups for its key wait until it reports its
//! removal, and are then answered with a fresh activation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::cluster::{ActivationConfig, Cluster, KIND_RUNTIME};
use crate::error::ActorError;
use crate::runtime::RuntimePid;

type RuntimeReply = oneshot::Sender<Result<RuntimePid, ActorError>>;

/// Messages the manager accepts.
#[derive(Debug)]
pub enum ManagerMessage {
    /// Return the runtime for `key`, activating one if needed.
    RequestRuntime { key: String, reply: RuntimeReply },
    /// Register `pid` under `key`, replacing any previous entry.
    AddRuntime { key: String, pid: RuntimePid },
    /// Unregister `key` if it still points at `pid_id`.
    RemoveRuntime { key: String, pid_id: Uuid },
    /// Number of registered runtimes.
    ActiveRuntimes { reply: oneshot::Sender<usize> },
}

/// Address of the [`RuntimeManager`].
#[derive(Debug, Clone)]
pub struct ManagerPid {
    tx: mpsc::UnboundedSender<ManagerMessage>,
}

impl ManagerPid {
    /// Look up or activate the runtime for `key`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::ActivationTimeout`] if the manager does not
    /// answer in time, [`ActorError::ManagerUnavailable`] if it has stopped,
    /// or the cluster's activation error.
    pub async fn request_runtime(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<RuntimePid, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerMessage::RequestRuntime {
                key: key.to_string(),
                reply,
            })
            .map_err(|_| ActorError::ManagerUnavailable)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ActorError::ManagerUnavailable),
            Err(_) => Err(ActorError::ActivationTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    pub fn add_runtime(&self, key: impl Into<String>, pid: RuntimePid) {
        let _ = self.tx.send(ManagerMessage::AddRuntime {
            key: key.into(),
            pid,
        });
    }

    pub fn remove_runtime(&self, key: impl Into<String>, pid_id: Uuid) {
        let _ = self.tx.send(ManagerMessage::RemoveRuntime {
            key: key.into(),
            pid_id,
        });
    }

    /// # Errors
    ///
    /// Returns [`ActorError::ManagerUnavailable`] if the manager has stopped.
    pub async fn active_runtimes(&self) -> Result<usize, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerMessage::ActiveRuntimes { reply })
            .map_err(|_| ActorError::ManagerUnavailable)?;
        rx.await.map_err(|_| ActorError::ManagerUnavailable)
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Directory of live runtimes keyed by deployment ID.
pub struct RuntimeManager {
    runtimes: HashMap<String, RuntimePid>,
    /// Lookups waiting for a draining runtime to leave.
    parked: HashMap<String, Vec<RuntimeReply>>,
    cluster: Arc<dyn Cluster>,
    // Weak so the manager stops once every external handle is gone.
    this: mpsc::WeakUnboundedSender<ManagerMessage>,
}

impl RuntimeManager {
    /// Start the manager on the current tokio runtime.
    pub fn spawn(cluster: Arc<dyn Cluster>) -> ManagerPid {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            runtimes: HashMap::new(),
            parked: HashMap::new(),
            cluster,
            this: tx.downgrade(),
        };
        tokio::spawn(manager.run(rx).instrument(info_span!("runtime_manager")));
        ManagerPid { tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ManagerMessage>) {
        info!("Runtime manager started");
        while let Some(message) = rx.recv().await {
            match message {
                ManagerMessage::RequestRuntime { key, reply } => self.request_runtime(key, reply),
                ManagerMessage::AddRuntime { key, pid } => {
                    debug!(%key, runtime_id = %pid.id(), "Runtime added");
                    self.runtimes.insert(key, pid);
                }
                ManagerMessage::RemoveRuntime { key, pid_id } => self.remove_runtime(&key, pid_id),
                ManagerMessage::ActiveRuntimes { reply } => {
                    let _ = reply.send(self.runtimes.len());
                }
            }
        }
        info!("Runtime manager stopped");
    }

    fn request_runtime(&mut self, key: String, reply: RuntimeReply) {
        if let Some(pid) = self.runtimes.get(&key) {
            if pid.is_alive() {
                answer(reply, Ok(pid.clone()));
                return;
            }
            if !pid.is_finished() {
                debug!(%key, runtime_id = %pid.id(), "Runtime draining, lookup parked");
                self.parked.entry(key).or_default().push(reply);
                return;
            }
            debug!(%key, runtime_id = %pid.id(), "Replacing stopped runtime");
        }

        let result = self.activate(&key);
        for waiter in self.parked.remove(&key).unwrap_or_default() {
            answer(waiter, result.clone());
        }
        answer(reply, result);
    }

    fn activate(&mut self, key: &str) -> Result<RuntimePid, ActorError> {
        let manager = self
            .this
            .upgrade()
            .map(|tx| ManagerPid { tx })
            .ok_or(ActorError::ManagerUnavailable)?;
        let pid = self.cluster.activate(
            KIND_RUNTIME,
            ActivationConfig {
                key: key.to_string(),
                manager,
            },
        )?;

        info!(%key, runtime_id = %pid.id(), "Runtime activated");
        self.runtimes.insert(key.to_string(), pid.clone());
        Ok(pid)
    }

    fn remove_runtime(&mut self, key: &str, pid_id: Uuid) {
        match self.runtimes.get(key).map(RuntimePid::id) {
            Some(current) if current == pid_id => {
                self.runtimes.remove(key);
                debug!(%key, runtime_id = %pid_id, "Runtime removed");

                let mut waiters = self.parked.remove(key).unwrap_or_default();
                waiters.retain(|waiter| !waiter.is_closed());
                if !waiters.is_empty() {
                    let result = self.activate(key);
                    for waiter in waiters {
                        answer(waiter, result.clone());
                    }
                }
            }
            Some(current) => debug!(
                %key,
                stale = %pid_id,
                %current,
                "Ignoring removal of a replaced runtime"
            ),
            None => {}
        }
    }
}

fn answer(reply: RuntimeReply, result: Result<RuntimePid, ActorError>) {
    if reply.send(result).is_err() {
        debug!("Runtime requester went away");
    }
}
