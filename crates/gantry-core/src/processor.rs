//! Contracts between the transport and the application layer.
//!
//! [`MessageProcessor`] is the receive-and-acknowledge contract every
//! transport front-end dispatches into. [`RequestValidator`] is an optional
//! pre-dispatch filter that can veto a message before the processor sees it.

use async_trait::async_trait;

use crate::callback::ResponseCallback;
use crate::errors::Result;
use crate::message::TransportMessage;

/// Application-side consumer of assembled transport messages.
///
/// `receive` is awaited on the connection's own task and must return
/// promptly; long-running work belongs in a spawned task. The reply goes
/// through `callback`, from whichever task ends up producing it.
///
/// Returning `Ok(false)` or an error rejects the message: the transport logs
/// it and terminates the connection with an empty response. Rejection is
/// never retried here.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Accept one complete message for processing.
    async fn receive(&self, message: TransportMessage, callback: ResponseCallback) -> Result<bool>;
}

/// Pre-dispatch request filter.
///
/// When [`should_continue`](RequestValidator::should_continue) returns
/// `false`, the transport skips the processor and completes the exchange
/// with [`rejection`](RequestValidator::rejection) instead.
pub trait RequestValidator: Send + Sync {
    /// Whether the message may proceed to the processor.
    fn should_continue(&self, message: &TransportMessage) -> bool;

    /// Response written when the message is vetoed. Defaults to an empty 403.
    fn rejection(&self, _message: &TransportMessage) -> TransportMessage {
        TransportMessage::response(403).with_body(bytes::Bytes::new())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
