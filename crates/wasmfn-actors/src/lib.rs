//! Actor layer for wasmfn.
//!
//! - [`Runtime`]: one deployment, one request at a time, stops when idle
//! - [`RuntimeManager`]: directory of live runtimes keyed by deployment ID
//! - [`Cluster`]: where new runtimes are placed
//!
//! Actors communicate only through tokio channels. A [`RuntimePid`] or
//! [`ManagerPid`] is a cheap, cloneable address; sending to a stopped actor
//! fails instead of blocking.

pub mod cluster;
pub mod error;
pub mod manager;
pub mod runtime;

pub use cluster::{ActivationConfig, Cluster, KIND_RUNTIME, LocalCluster};
pub use error::{ActorError, MailboxClosed};
pub use manager::{ManagerMessage, ManagerPid, RuntimeManager};
pub use runtime::{
    Runtime, RuntimeDeps, RuntimeMailbox, RuntimeMessage, RuntimePid, status_for_error,
};
