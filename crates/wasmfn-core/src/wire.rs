//! Wire protocol between the host and an executing sandbox.
//!
//! Requests travel into the guest as a protobuf message on stdin. The guest
//! answers on stdout: free-form log output, then the response body, then a
//! fixed-size trailer carrying the status code and the body length.
//!
//! ```text
//! ┌──────────────┬───────────────┬──────────────────────────────┐
//! │ logs (any)   │ body (len)    │ status u32 LE │ len u32 LE   │
//! └──────────────┴───────────────┴──────────────────────────────┘
//! ```
//!
//! Interpreted guests cannot write raw bytes reliably, so they hex-encode the
//! trailer into the final 16 characters of stdout ([`TrailerFormat::Hex`]).

use std::collections::HashMap;

use prost::Message;

use wasmfn_common::{RuntimeKind, WireError};

/// Size of the binary trailer.
pub const TRAILER_LEN: usize = 8;

/// Size of the hex-encoded trailer.
pub const HEX_TRAILER_LEN: usize = TRAILER_LEN * 2;

/// An HTTP request as seen by a guest.
#[derive(Clone, PartialEq, Message)]
pub struct WireRequest {
    /// Correlation id.
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub method: String,
    /// Path and query with the `/live/{id}` or `/preview/{id}` prefix removed.
    #[prost(string, tag = "3")]
    pub url: String,
    #[prost(map = "string, message", tag = "4")]
    pub header: HashMap<String, HeaderFields>,
    #[prost(bytes = "vec", tag = "5")]
    pub body: Vec<u8>,
    /// Exposed to the guest as its process environment, not on stdin.
    #[prost(map = "string, string", tag = "6")]
    pub env: HashMap<String, String>,
    /// `go` or `js`.
    #[prost(string, tag = "7")]
    pub runtime: String,
    #[prost(string, tag = "8")]
    pub deployment_id: String,
    #[prost(string, tag = "9")]
    pub endpoint_id: String,
    /// Preview invocations never emit metrics.
    #[prost(bool, tag = "10")]
    pub preview: bool,
}

/// All values of one header name.
#[derive(Clone, PartialEq, Message)]
pub struct HeaderFields {
    #[prost(string, repeated, tag = "1")]
    pub fields: Vec<String>,
}

/// The answer to a [`WireRequest`].
#[derive(Clone, PartialEq, Message)]
pub struct WireResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub response: Vec<u8>,
    /// Always equal to the id of the request being answered.
    #[prost(string, tag = "2")]
    pub request_id: String,
    #[prost(int32, tag = "3")]
    pub status_code: i32,
}

impl WireRequest {
    /// Serialize for the guest's stdin.
    pub fn to_stdin(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode a request written by [`WireRequest::to_stdin`].
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidMessage`] if the bytes are not a valid message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Self::decode(bytes).map_err(|e| WireError::InvalidMessage {
            reason: e.to_string(),
        })
    }

    /// The runtime kind named by the request, if it is a known one.
    pub fn runtime_kind(&self) -> Option<RuntimeKind> {
        self.runtime.parse().ok()
    }
}

impl WireResponse {
    /// A successful or guest-computed response.
    pub fn new(request_id: impl Into<String>, status_code: i32, response: Vec<u8>) -> Self {
        Self {
            response,
            request_id: request_id.into(),
            status_code,
        }
    }

    /// A response synthesized by the host when the guest could not answer.
    pub fn error(request_id: impl Into<String>, status_code: i32, message: &str) -> Self {
        Self::new(request_id, status_code, message.as_bytes().to_vec())
    }
}

/// How the trailer is laid out at the end of stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailerFormat {
    /// Eight raw bytes.
    Raw,
    /// Eight bytes hex-encoded into sixteen ASCII characters.
    Hex,
}

impl From<RuntimeKind> for TrailerFormat {
    fn from(kind: RuntimeKind) -> Self {
        match kind {
            RuntimeKind::Go => Self::Raw,
            RuntimeKind::Js => Self::Hex,
        }
    }
}

/// Decoded stdout of one sandbox execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutput {
    pub logs: Vec<u8>,
    pub body: Vec<u8>,
    pub status: u32,
}

impl SandboxOutput {
    /// Log section as text, with invalid UTF-8 replaced.
    pub fn logs_lossy(&self) -> String {
        String::from_utf8_lossy(&self.logs).into_owned()
    }
}

/// Split captured stdout into logs, body and status.
///
/// # Errors
///
/// Returns [`WireError::MalformedOutput`] if the output is shorter than the
/// trailer, the hex trailer does not decode, or the declared body length
/// exceeds the bytes preceding the trailer.
pub fn decode_output(stdout: &[u8], format: TrailerFormat) -> Result<SandboxOutput, WireError> {
    let (preceding, trailer) = match format {
        TrailerFormat::Raw => {
            let Some(split) = stdout.len().checked_sub(TRAILER_LEN) else {
                return Err(WireError::malformed(format!(
                    "output is {} bytes, shorter than the {TRAILER_LEN} byte trailer",
                    stdout.len()
                )));
            };
            let mut trailer = [0u8; TRAILER_LEN];
            trailer.copy_from_slice(&stdout[split..]);
            (&stdout[..split], trailer)
        }
        TrailerFormat::Hex => {
            let Some(split) = stdout.len().checked_sub(HEX_TRAILER_LEN) else {
                return Err(WireError::malformed(format!(
                    "output is {} bytes, shorter than the {HEX_TRAILER_LEN} character hex trailer",
                    stdout.len()
                )));
            };
            let mut trailer = [0u8; TRAILER_LEN];
            hex::decode_to_slice(&stdout[split..], &mut trailer)
                .map_err(|e| WireError::malformed(format!("invalid hex trailer: {e}")))?;
            (&stdout[..split], trailer)
        }
    };

    let status = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let declared = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);

    let body_len = usize::try_from(declared)
        .ok()
        .filter(|len| *len <= preceding.len())
        .ok_or_else(|| {
            WireError::malformed(format!(
                "declared response length {declared} exceeds the {} bytes before the trailer",
                preceding.len()
            ))
        })?;

    let body_start = preceding.len() - body_len;
    Ok(SandboxOutput {
        logs: preceding[..body_start].to_vec(),
        body: preceding[body_start..].to_vec(),
        status,
    })
}

/// Build stdout the way a guest would write it.
///
/// # Errors
///
/// Returns [`WireError::MalformedOutput`] if `body` is longer than the
/// trailer can describe.
pub fn encode_output(
    logs: &[u8],
    body: &[u8],
    status: u32,
    format: TrailerFormat,
) -> Result<Vec<u8>, WireError> {
    let len = u32::try_from(body.len())
        .map_err(|_| WireError::malformed(format!("body of {} bytes is too large", body.len())))?;
    let mut trailer = [0u8; TRAILER_LEN];
    trailer[..4].copy_from_slice(&status.to_le_bytes());
    trailer[4..].copy_from_slice(&len.to_le_bytes());

    let mut out = Vec::with_capacity(logs.len() + body.len() + HEX_TRAILER_LEN);
    out.extend_from_slice(logs);
    out.extend_from_slice(body);
    match format {
        TrailerFormat::Raw => out.extend_from_slice(&trailer),
        TrailerFormat::Hex => out.extend_from_slice(hex::encode(trailer).as_bytes()),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hello_ok() {
        let mut stdout = b"hello\nOK".to_vec();
        stdout.extend_from_slice(&200u32.to_le_bytes());
        stdout.extend_from_slice(&2u32.to_le_bytes());

        let out = decode_output(&stdout, TrailerFormat::Raw).unwrap();

        assert_eq!(out.logs, b"hello\n");
        assert_eq!(out.body, b"OK");
        assert_eq!(out.status, 200);
    }

    #[test]
    fn test_decode_hex_trailer() {
        // status 404 = 0x194, len 9
        let stdout = b"log linenot found9401000009000000";

        let out = decode_output(stdout, TrailerFormat::Hex).unwrap();

        assert_eq!(out.logs_lossy(), "log line");
        assert_eq!(out.body, b"not found");
        assert_eq!(out.status, 404);
    }

    #[test]
    fn test_encode_matches_decode() {
        for format in [TrailerFormat::Raw, TrailerFormat::Hex] {
            let stdout = encode_output(b"a\nb\n", b"{\"ok\":true}", 201, format).unwrap();
            let out = decode_output(&stdout, format).unwrap();

            assert_eq!(out.logs, b"a\nb\n");
            assert_eq!(out.body, b"{\"ok\":true}");
            assert_eq!(out.status, 201);
        }
    }

    #[test]
    fn test_empty_body_and_logs() {
        let stdout = encode_output(b"", b"", 204, TrailerFormat::Raw).unwrap();
        assert_eq!(stdout.len(), TRAILER_LEN);

        let out = decode_output(&stdout, TrailerFormat::Raw).unwrap();
        assert!(out.logs.is_empty());
        assert!(out.body.is_empty());
        assert_eq!(out.status, 204);
    }

    #[test]
    fn test_truncated_output_rejected() {
        for len in 0..TRAILER_LEN {
            let result = decode_output(&vec![0u8; len], TrailerFormat::Raw);
            assert!(matches!(result, Err(WireError::MalformedOutput { .. })));
        }

        let result = decode_output(b"0011223344", TrailerFormat::Hex);
        assert!(matches!(result, Err(WireError::MalformedOutput { .. })));
    }

    #[test]
    fn test_length_exceeding_output_rejected() {
        let mut stdout = b"OK".to_vec();
        stdout.extend_from_slice(&200u32.to_le_bytes());
        stdout.extend_from_slice(&3u32.to_le_bytes());

        let result = decode_output(&stdout, TrailerFormat::Raw);
        assert!(matches!(result, Err(WireError::MalformedOutput { .. })));

        let result = decode_output(&[0xff; TRAILER_LEN], TrailerFormat::Raw);
        assert!(matches!(result, Err(WireError::MalformedOutput { .. })));
    }

    #[test]
    fn test_invalid_hex_rejected() {
        let result = decode_output(b"body zzzzzzzzzzzzzzzz", TrailerFormat::Hex);
        assert!(matches!(result, Err(WireError::MalformedOutput { .. })));
    }

    #[test]
    fn test_trailer_format_for_runtime() {
        assert_eq!(TrailerFormat::from(RuntimeKind::Go), TrailerFormat::Raw);
        assert_eq!(TrailerFormat::from(RuntimeKind::Js), TrailerFormat::Hex);
    }

    #[test]
    fn test_request_message() {
        let mut header = HashMap::new();
        header.insert(
            "Accept".to_string(),
            HeaderFields {
                fields: vec!["text/plain".into(), "application/json".into()],
            },
        );
        let request = WireRequest {
            id: "req-1".into(),
            method: "POST".into(),
            url: "/items?limit=2".into(),
            header,
            body: b"payload".to_vec(),
            runtime: "go".into(),
            preview: true,
            ..Default::default()
        };

        let decoded = WireRequest::from_bytes(&request.to_stdin()).unwrap();

        assert_eq!(decoded, request);
        assert_eq!(decoded.runtime_kind(), Some(RuntimeKind::Go));
        assert!(WireRequest::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_error_response_keeps_id() {
        let response = WireResponse::error("req-9", 500, "internal server error");

        assert_eq!(response.request_id, "req-9");
        assert_eq!(response.status_code, 500);
        assert_eq!(response.response, b"internal server error");
    }
}
