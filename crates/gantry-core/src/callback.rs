//! One-shot response delivery back to the owning connection.
//!
//! A [`ResponseCallback`] is handed to the processor together with each
//! dispatched message. Completing it consumes the handle, so a double
//! completion is unrepresentable. The reply crosses back to the connection's
//! own task over a oneshot channel; the processor side never touches
//! connection state directly.
//!
//! Dropping a callback without completing it is how a processor signals that
//! it gave up: the connection side observes [`TransportError::CallbackDropped`]
//! and terminates the exchange.

use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{Result, TransportError};
use crate::ids::ConnectionId;
use crate::message::TransportMessage;

/// Single-use handle for delivering a response to an inbound connection.
#[derive(Debug)]
pub struct ResponseCallback {
    tx: oneshot::Sender<TransportMessage>,
    connection_id: ConnectionId,
}

/// Connection-side receiver paired with a [`ResponseCallback`].
#[derive(Debug)]
pub struct ResponseReceiver {
    rx: oneshot::Receiver<TransportMessage>,
}

impl ResponseCallback {
    /// Create a callback/receiver pair bound to a connection.
    #[must_use]
    pub fn channel(connection_id: ConnectionId) -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx, connection_id }, ResponseReceiver { rx })
    }

    /// Deliver the response and release the callback.
    ///
    /// Safe to call from any task. If the owning connection has already gone
    /// away the response is quietly discarded.
    pub fn complete(self, message: TransportMessage) {
        if self.tx.send(message).is_err() {
            debug!(
                connection_id = %self.connection_id,
                "response discarded, connection already closed"
            );
        }
    }

    /// The inbound connection this callback belongs to.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }
}

impl ResponseReceiver {
    /// Wait for the response.
    ///
    /// Returns [`TransportError::CallbackDropped`] if the callback was
    /// dropped without being completed.
    pub async fn recv(self) -> Result<TransportMessage> {
        self.rx.await.map_err(|_| TransportError::CallbackDropped)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
