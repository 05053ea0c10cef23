//! Errors raised by the actor layer.

use thiserror::Error;
use uuid::Uuid;

use wasmfn_core::WireRequest;

/// Failures obtaining or reaching an execution actor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActorError {
    /// The runtime manager has stopped.
    #[error("runtime manager is not running")]
    ManagerUnavailable,

    /// The manager did not hand out a runtime before the deadline.
    #[error("runtime activation timed out after {timeout_ms}ms")]
    ActivationTimeout { timeout_ms: u64 },

    /// The cluster could not place a runtime.
    #[error("runtime activation failed: {reason}")]
    ActivationFailed { reason: String },
}

impl ActorError {
    /// Returns `true` if the same request may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ActivationTimeout { .. })
    }
}

/// A request that could not be delivered because the runtime has stopped.
///
/// Carries the request back so the caller can retry against a new runtime.
#[derive(Debug, Error)]
#[error("runtime ({pid}) mailbox is closed")]
pub struct MailboxClosed {
    pub pid: Uuid,
    pub request: Box<WireRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ActorError::ActivationTimeout { timeout_ms: 100 }.is_retryable());
        assert!(!ActorError::ManagerUnavailable.is_retryable());
        assert!(
            !ActorError::ActivationFailed {
                reason: "no capacity".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_display() {
        let err = ActorError::ActivationTimeout { timeout_ms: 100 };
        assert_eq!(err.to_string(), "runtime activation timed out after 100ms");
    }
}
