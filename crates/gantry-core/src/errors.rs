//! Error types for the transport connector.
//!
//! [`TransportError`] is the shared error vocabulary across the listener and
//! sender crates. Every error is scoped to a single connection or exchange;
//! nothing here is retried by the transport itself.

use thiserror::Error;

/// Errors surfaced by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket read/write failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or oversized wire traffic on an established connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// WebSocket upgrade negotiation failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// No pooled connection became available within the configured wait.
    #[error("connection pool exhausted for {route}")]
    PoolExhausted {
        /// Route whose pool hit its ceiling.
        route: String,
    },

    /// Outbound TCP connect failed or timed out.
    #[error("connect to {route} failed: {message}")]
    ConnectFailed {
        /// Destination route.
        route: String,
        /// Underlying failure description.
        message: String,
    },

    /// The processor declined the message (`receive` returned `false`).
    #[error("message rejected by processor")]
    ProcessorRejected,

    /// The processor failed while handling a message.
    #[error("processor error: {0}")]
    Processor(String),

    /// The response callback was dropped without being completed.
    #[error("response callback dropped without completing")]
    CallbackDropped,

    /// The peer or the transport closed the connection mid-operation.
    #[error("connection closed")]
    ConnectionClosed,

    /// A second outbound wrapper was bound for an already-bound route.
    #[error("outbound channel already bound for {route}")]
    AlreadyBound {
        /// Route that already has a bound wrapper.
        route: String,
    },

    /// The message is structurally unusable for the attempted operation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The exchange was canceled because its inbound connection went away.
    #[error("exchange canceled")]
    Canceled,
}

/// Convenience type alias for transport results.
pub type Result<T> = std::result::Result<T, TransportError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
