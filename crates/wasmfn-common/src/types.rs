//! Data model shared across the workspace.
//!
//! Endpoints and deployments are owned by the storage collaborator; the
//! execution layer only reads them.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The language runtime a deployment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// A natively compiled WebAssembly module.
    Go,
    /// A script run inside a WebAssembly-hosted interpreter.
    Js,
}

impl RuntimeKind {
    /// Lowercase name used on the wire and in configuration.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Js => "js",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown runtime kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid runtime kind '{0}', expected 'go' or 'js'")]
pub struct ParseRuntimeKindError(String);

impl FromStr for RuntimeKind {
    type Err = ParseRuntimeKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "go" => Ok(Self::Go),
            "js" => Ok(Self::Js),
            other => Err(ParseRuntimeKindError(other.to_string())),
        }
    }
}

/// A named HTTP entry point whose behavior is given by its active deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Uuid,
    pub name: String,
    pub runtime: RuntimeKind,
    pub active_deployment_id: Option<Uuid>,
    /// Published deployments, oldest first. The last entry is the active one.
    pub deployment_history: Vec<Uuid>,
    pub environment: HashMap<String, String>,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    /// Create an endpoint with no published deployment.
    pub fn new(
        name: impl Into<String>,
        runtime: RuntimeKind,
        environment: HashMap<String, String>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            name: name.into(),
            runtime,
            active_deployment_id: None,
            deployment_history: Vec::new(),
            environment,
            url: format!("/live/{id}"),
            created_at: Utc::now(),
        }
    }

    /// Returns `true` if the endpoint has a published deployment.
    pub fn is_published(&self) -> bool {
        self.active_deployment_id.is_some()
    }
}

/// An immutable code blob bound to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    /// SHA-256 of `blob`, hex encoded.
    pub hash: String,
    #[serde(with = "blob_hex")]
    pub blob: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(endpoint_id: Uuid, blob: impl Into<Vec<u8>>) -> Self {
        let blob = blob.into();
        Self {
            id: Uuid::new_v4(),
            endpoint_id,
            hash: content_hash(&blob),
            blob,
            created_at: Utc::now(),
        }
    }
}

/// Hex encoded SHA-256 of a deployment blob.
pub fn content_hash(blob: &[u8]) -> String {
    hex::encode(Sha256::digest(blob))
}

/// Completion record for one non-preview invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetric {
    /// Correlation id of the request.
    pub id: String,
    pub endpoint_id: Uuid,
    pub deployment_id: Uuid,
    pub request_url: String,
    pub status_code: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

mod blob_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(blob))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
