//! Actor placement.
//!
//! The manager never spawns runtimes itself; it asks a [`Cluster`] to
//! activate one. [`LocalCluster`] places every actor on the current process.

use crate::error::ActorError;
use crate::manager::ManagerPid;
use crate::runtime::{Runtime, RuntimeDeps, RuntimePid};

/// Actor kind for execution runtimes.
pub const KIND_RUNTIME: &str = "runtime";

/// What a new actor needs to know about its place in the directory.
#[derive(Debug, Clone)]
pub struct ActivationConfig {
    /// Directory key the actor is registered under.
    pub key: String,
    /// Manager to notify when the actor stops.
    pub manager: ManagerPid,
}

/// Places actors and returns their address.
pub trait Cluster: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ActorError::ActivationFailed`] if no actor of `kind` can be
    /// started.
    fn activate(&self, kind: &str, config: ActivationConfig) -> Result<RuntimePid, ActorError>;
}

/// Single-process [`Cluster`].
pub struct LocalCluster {
    deps: RuntimeDeps,
}

impl LocalCluster {
    pub fn new(deps: RuntimeDeps) -> Self {
        Self { deps }
    }
}

impl Cluster for LocalCluster {
    fn activate(&self, kind: &str, config: ActivationConfig) -> Result<RuntimePid, ActorError> {
        if kind != KIND_RUNTIME {
            return Err(ActorError::ActivationFailed {
                reason: format!("unknown actor kind '{kind}'"),
            });
        }
        Ok(Runtime::spawn(config.key, config.manager, self.deps.clone()))
    }
}
