//! HTTP responses from sandbox output.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};

use wasmfn_core::WireResponse;

/// Header carrying the correlation ID of the request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP response on its way back to the client.
#[derive(Debug, Clone)]
pub struct WasmHttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WasmHttpResponse {
    /// Status and body exactly as the sandbox produced them.
    ///
    /// A status outside the valid HTTP range becomes 500.
    pub fn from_wire(response: WireResponse) -> Self {
        let status = u16::try_from(response.status_code)
            .ok()
            .filter(|code| StatusCode::from_u16(*code).is_ok())
            .unwrap_or(500);

        Self {
            status,
            headers: Vec::new(),
            body: response.response,
        }
    }

    /// Create a JSON response.
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    /// Create an error response with JSON body.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({
            "error": message
        })
        .to_string();
        Self::json(status, &body)
    }

    /// Add a header to the response.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Convert to Axum response.
    pub fn into_axum_response(self) -> Response<Body> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(name, value);
            }
        }

        response
    }
}
