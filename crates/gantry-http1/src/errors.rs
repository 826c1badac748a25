//! Error types for the HTTP/1.1 codecs.

use thiserror::Error;

use gantry_core::errors::TransportError;

/// Errors produced while encoding or decoding HTTP/1.1 traffic.
#[derive(Debug, Error)]
pub enum Http1Error {
    /// Underlying socket read/write failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The request or status line / header block could not be parsed.
    #[error("malformed head: {0}")]
    Parse(String),

    /// The head grew past the configured ceiling without completing.
    #[error("head exceeds {limit} bytes")]
    HeadTooLarge {
        /// Maximum accepted head size.
        limit: usize,
    },

    /// Invalid or contradictory body framing information.
    #[error("invalid body framing: {0}")]
    Framing(String),

    /// The peer closed the connection in the middle of a framed body.
    #[error("connection closed mid-message")]
    UnexpectedEof,
}

/// Codec errors fold into the shared transport taxonomy as protocol errors,
/// except raw I/O failures which stay I/O failures.
impl From<Http1Error> for TransportError {
    fn from(err: Http1Error) -> Self {
        match err {
            Http1Error::Io(io) => TransportError::Io(io),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
