//! Request handlers.
//!
//! [`ingress`] serves every path under `/live/` and `/preview/`: it resolves
//! the target deployment, builds the wire request, and waits on the proxy for
//! the sandbox's response.

use std::error::Error as _;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::IngressError;
use crate::request::{IngressPath, build_wire_request};
use crate::response::{REQUEST_ID_HEADER, WasmHttpResponse};
use crate::state::AppState;

/// Forward an HTTP request to the targeted deployment.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn ingress(State(state): State<AppState>, request: Request) -> Response {
    match serve(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            info!(status = err.status(), error = %err, "Request rejected");
            err.into_response()
        }
    }
}

async fn serve(state: &AppState, request: Request) -> Result<Response, IngressError> {
    let (parts, body) = request.into_parts();

    let path = IngressPath::parse(parts.uri.path())?;
    let (endpoint, deployment_id) = state.resolve(path.target)?;

    let limit = state.max_body_bytes();
    let body = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| body_error(&e, limit))?;

    let wire = build_wire_request(&parts, &path, &body, &endpoint, deployment_id);
    let request_id = wire.id.clone();
    info!(
        request_id = %request_id,
        endpoint_id = %endpoint.id,
        deployment_id = %deployment_id,
        preview = wire.preview,
        "Forwarding request"
    );

    let response = state.proxy().invoke(wire).await?;
    info!(request_id = %request_id, status = response.status_code, "Request completed");

    Ok(WasmHttpResponse::from_wire(response)
        .with_header(REQUEST_ID_HEADER, &request_id)
        .into_axum_response())
}

fn body_error(err: &axum::Error, limit: usize) -> IngressError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = source {
        if cause.is::<LengthLimitError>() {
            return IngressError::BodyTooLarge { limit };
        }
        source = cause.source();
    }
    IngressError::Body {
        reason: err.to_string(),
    }
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Debug, Serialize)]
struct Readiness {
    status: &'static str,
    active_runtimes: usize,
}

/// Readiness check handler.
///
/// Ready while the runtime manager answers; reports its live runtimes.
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.manager().active_runtimes().await {
        Ok(active_runtimes) => (
            StatusCode::OK,
            axum::Json(Readiness {
                status: "ready",
                active_runtimes,
            }),
        )
            .into_response(),
        Err(err) => WasmHttpResponse::error(503, &err.to_string()).into_axum_response(),
    }
}
