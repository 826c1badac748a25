//! Message heads and codec event types.

use bytes::Bytes;

use gantry_core::headers::Headers;

/// Parsed request line plus headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Request target as it appeared on the wire.
    pub target: String,
    /// Protocol version string, e.g. `HTTP/1.1`.
    pub version: String,
    /// Headers in arrival order.
    pub headers: Headers,
}

impl RequestHead {
    /// Create an HTTP/1.1 head with empty headers.
    #[must_use]
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version: "HTTP/1.1".to_owned(),
            headers: Headers::new(),
        }
    }

    /// Whether the peer expects the connection to stay open after this
    /// exchange. HTTP/1.0 defaults to close, HTTP/1.1 to keep-alive.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        if self.version == "HTTP/1.0" {
            self.headers.has_token("Connection", "keep-alive")
        } else {
            !self.headers.has_token("Connection", "close")
        }
    }
}

/// Parsed status line plus headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Protocol version string.
    pub version: String,
    /// Headers in write order.
    pub headers: Headers,
}

impl ResponseHead {
    /// Create an HTTP/1.1 head with the canonical reason phrase.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_owned(),
            version: "HTTP/1.1".to_owned(),
            headers: Headers::new(),
        }
    }

    /// Whether this response permits reusing the connection.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        if self.version == "HTTP/1.0" {
            self.headers.has_token("Connection", "keep-alive")
        } else {
            !self.headers.has_token("Connection", "close")
        }
    }
}

/// One decoded/encoded step of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestEvent {
    /// Request line and headers are complete.
    Head(RequestHead),
    /// A piece of the body, in arrival order.
    Chunk(Bytes),
    /// End-of-message marker.
    End,
}

/// One decoded/encoded step of a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseEvent {
    /// Status line and headers are complete.
    Head(ResponseHead),
    /// A piece of the body, in arrival order.
    Chunk(Bytes),
    /// End-of-message marker.
    End,
}

/// Canonical reason phrase for a status code.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
