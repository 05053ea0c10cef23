//! Ingress errors and their HTTP mapping.

use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use wasmfn_common::StorageError;

use crate::response::WasmHttpResponse;

/// Failures the ingress answers itself, without a sandbox response.
#[derive(Debug, Error)]
pub enum IngressError {
    /// The path is not under `/live/` or `/preview/`.
    #[error("invalid request url '{path}'")]
    NoRoute { path: String },

    /// The path is missing its identifier or the identifier is not a UUID.
    #[error("malformed identifier '{raw}'")]
    MalformedId { raw: String },

    #[error("endpoint ({id}) not found")]
    EndpointNotFound { id: Uuid },

    #[error("endpoint ({id}) has no active deployment")]
    NoActiveDeployment { id: Uuid },

    #[error("deployment ({id}) not found")]
    DeploymentNotFound { id: Uuid },

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// The body could not be read, e.g. the client went away mid-upload.
    #[error("failed to read request body: {reason}")]
    Body { reason: String },

    #[error("storage unavailable: {reason}")]
    Storage { reason: String },

    /// The correlation proxy has stopped.
    #[error("ingress proxy is not running")]
    ProxyUnavailable,

    /// No response arrived before the request deadline.
    #[error("no response after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl IngressError {
    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::NoRoute { .. } | Self::MalformedId { .. } | Self::Body { .. } => 400,
            Self::EndpointNotFound { .. }
            | Self::NoActiveDeployment { .. }
            | Self::DeploymentNotFound { .. } => 404,
            Self::BodyTooLarge { .. } => 413,
            Self::Storage { .. } => 500,
            Self::ProxyUnavailable => 503,
            Self::Timeout { .. } => 504,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == 404
    }
}

impl From<StorageError> for IngressError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EndpointNotFound { id } => Self::EndpointNotFound { id },
            StorageError::DeploymentNotFound { id } => Self::DeploymentNotFound { id },
            StorageError::Backend { reason } => Self::Storage { reason },
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        WasmHttpResponse::error(self.status(), &self.to_string()).into_axum_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(IngressError::MalformedId { raw: "x".into() }.status(), 400);
        assert_eq!(
            IngressError::NoRoute {
                path: "/favicon.ico".into()
            }
            .status(),
            400
        );
        assert_eq!(IngressError::BodyTooLarge { limit: 8 }.status(), 413);
        assert_eq!(
            IngressError::Body {
                reason: "connection reset".into()
            }
            .status(),
            400
        );
        assert_eq!(IngressError::EndpointNotFound { id }.status(), 404);
        assert_eq!(IngressError::NoActiveDeployment { id }.status(), 404);
        assert_eq!(IngressError::ProxyUnavailable.status(), 503);
        assert_eq!(IngressError::Timeout { timeout_ms: 5 }.status(), 504);
    }

    #[test]
    fn test_from_storage_error() {
        let id = Uuid::new_v4();
        let err = IngressError::from(StorageError::DeploymentNotFound { id });
        assert!(err.is_not_found());

        let err = IngressError::from(StorageError::Backend {
            reason: "down".into(),
        });
        assert_eq!(err.status(), 500);
    }
}
