//! Typed operation results.

use bytes::Bytes;

pub use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::error::Result;

/// Content type of every frame payload.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// What was put on the wire for an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEcho {
    /// Logical method, as the REST equivalent would use.
    pub method: &'static str,
    /// Logical resource path, e.g. `v3/conversations/{c}/activities/{a}`.
    pub path: String,
    pub content_type: &'static str,
    /// The exact frame payload.
    pub body: Bytes,
}

impl RequestEcho {
    pub fn post(path: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: "POST",
            path: path.into(),
            content_type: JSON_CONTENT_TYPE,
            body,
        }
    }

    /// Frame payload as text. Always `Some` for frames this crate built.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Successful outcome of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse<T> {
    pub status: StatusCode,
    pub request: RequestEcho,
    pub body: T,
}

impl<T> OperationResponse<T> {
    pub fn ok(request: RequestEcho, body: T) -> Self {
        Self {
            status: StatusCode::OK,
            request,
            body,
        }
    }

    pub fn into_body(self) -> T {
        self.body
    }
}

/// Either a populated response or a typed failure, never both.
pub type OperationResult<T> = Result<OperationResponse<T>>;
