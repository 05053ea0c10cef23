//! Ingress path parsing and wire request construction.
//!
//! Requests arrive as `/live/{endpointID}/rest` or
//! `/preview/{deploymentID}/rest`. The prefix and identifier are stripped and
//! `/rest?query` is forwarded to the sandbox unchanged.

use std::collections::HashMap;

use axum::http::request::Parts;
use bytes::Bytes;
use uuid::Uuid;

use wasmfn_common::Endpoint;
use wasmfn_core::{HeaderFields, WireRequest};

use crate::error::IngressError;

/// Which deployment a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The active deployment of an endpoint.
    Live { endpoint_id: Uuid },
    /// A specific deployment, published or not.
    Preview { deployment_id: Uuid },
}

impl Target {
    pub fn is_preview(&self) -> bool {
        matches!(self, Self::Preview { .. })
    }
}

/// A parsed ingress path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressPath {
    pub target: Target,
    /// Path forwarded to the sandbox, always starting with `/`.
    pub rest: String,
}

impl IngressPath {
    /// # Errors
    ///
    /// Returns [`IngressError::NoRoute`] for paths outside `/live/` and
    /// `/preview/`, and [`IngressError::MalformedId`] when the identifier is
    /// missing or not a UUID.
    pub fn parse(path: &str) -> Result<Self, IngressError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let mut segments = trimmed.splitn(3, '/');

        let kind = segments.next().unwrap_or_default();
        if kind != "live" && kind != "preview" {
            return Err(IngressError::NoRoute {
                path: path.to_string(),
            });
        }

        let raw = segments.next().unwrap_or_default();
        let id = Uuid::parse_str(raw).map_err(|_| IngressError::MalformedId {
            raw: raw.to_string(),
        })?;

        let target = if kind == "live" {
            Target::Live { endpoint_id: id }
        } else {
            Target::Preview { deployment_id: id }
        };
        let rest = format!("/{}", segments.next().unwrap_or_default());

        Ok(Self { target, rest })
    }

    /// The forwarded URL: the stripped path plus the original query.
    pub fn forwarded_url(&self, query: Option<&str>) -> String {
        match query {
            Some(query) => format!("{}?{query}", self.rest),
            None => self.rest.clone(),
        }
    }
}

/// Build the wire request for one ingress call.
///
/// The endpoint supplies the environment and runtime kind, also for previews.
pub fn build_wire_request(
    parts: &Parts,
    path: &IngressPath,
    body: &Bytes,
    endpoint: &Endpoint,
    deployment_id: Uuid,
) -> WireRequest {
    let mut header: HashMap<String, HeaderFields> = HashMap::new();
    for (name, value) in &parts.headers {
        header
            .entry(name.as_str().to_string())
            .or_default()
            .fields
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    WireRequest {
        id: Uuid::new_v4().to_string(),
        method: parts.method.to_string(),
        url: path.forwarded_url(parts.uri.query()),
        header,
        body: body.to_vec(),
        env: endpoint.environment.clone(),
        runtime: endpoint.runtime.as_str().to_string(),
        deployment_id: deployment_id.to_string(),
        endpoint_id: endpoint.id.to_string(),
        preview: path.target.is_preview(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request};
    use wasmfn_common::RuntimeKind;

    #[test]
    fn test_parse_live() {
        let id = Uuid::new_v4();
        let path = IngressPath::parse(&format!("/live/{id}/api/users")).unwrap();

        assert_eq!(path.target, Target::Live { endpoint_id: id });
        assert_eq!(path.rest, "/api/users");
    }

    #[test]
    fn test_parse_preview_without_rest() {
        let id = Uuid::new_v4();

        let path = IngressPath::parse(&format!("/preview/{id}")).unwrap();
        assert_eq!(path.target, Target::Preview { deployment_id: id });
        assert_eq!(path.rest, "/");

        let path = IngressPath::parse(&format!("/preview/{id}/")).unwrap();
        assert_eq!(path.rest, "/");
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(matches!(
            IngressPath::parse("/live/not-a-uuid/x"),
            Err(IngressError::MalformedId { .. })
        ));
        assert!(matches!(
            IngressPath::parse("/live"),
            Err(IngressError::MalformedId { .. })
        ));
        assert!(matches!(
            IngressPath::parse("/functions/abc"),
            Err(IngressError::NoRoute { .. })
        ));
    }

    #[test]
    fn test_forwarded_url_keeps_query() {
        let id = Uuid::new_v4();
        let path = IngressPath::parse(&format!("/live/{id}/search")).unwrap();

        assert_eq!(path.forwarded_url(Some("q=1&x=y")), "/search?q=1&x=y");
        assert_eq!(path.forwarded_url(None), "/search");
    }

    #[test]
    fn test_build_wire_request() {
        let endpoint = Endpoint::new(
            "fn",
            RuntimeKind::Js,
            HashMap::from([("KEY".to_string(), "value".to_string())]),
        );
        let deployment_id = Uuid::new_v4();
        let (parts, ()) = Request::builder()
            .method(Method::POST)
            .uri(format!("/preview/{deployment_id}/items?limit=2"))
            .header("accept", "text/plain")
            .header("accept", "application/json")
            .body(())
            .unwrap()
            .into_parts();
        let path = IngressPath::parse(parts.uri.path()).unwrap();

        let wire = build_wire_request(
            &parts,
            &path,
            &Bytes::from_static(b"payload"),
            &endpoint,
            deployment_id,
        );

        assert_eq!(wire.method, "POST");
        assert_eq!(wire.url, "/items?limit=2");
        assert_eq!(wire.body, b"payload");
        assert_eq!(wire.runtime, "js");
        assert_eq!(wire.env["KEY"], "value");
        assert_eq!(wire.deployment_id, deployment_id.to_string());
        assert_eq!(wire.endpoint_id, endpoint.id.to_string());
        assert!(wire.preview);
        assert_eq!(
            wire.header["accept"].fields,
            vec!["text/plain", "application/json"]
        );
        assert!(Uuid::parse_str(&wire.id).is_ok());
    }
}
