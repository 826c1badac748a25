//! The upgrade offer a processor accepts or cancels.
//!
//! When a valid upgrade request arrives, the connection task parks the
//! handshake and delivers an [`UpgradeOffer`] as the `Init` message. The
//! processor drives the outcome: [`UpgradeOffer::accept`] completes the
//! handshake and yields the live session, [`UpgradeOffer::cancel`] refuses
//! it with a close frame. Dropping the offer undecided rejects the upgrade
//! and leaves the connection usable as plain HTTP.

use std::time::Duration;

use gantry_core::errors::{Result, TransportError};
use gantry_core::ids::ConnectionId;
use tokio::sync::oneshot;
use tracing::debug;

use crate::session::WebSocketSession;

/// Terms of an accepted upgrade, sent back to the connection task.
#[derive(Debug)]
pub struct AcceptTerms {
    /// Supported sub-protocols in preference order; empty accepts any.
    pub subprotocols: Vec<String>,
    /// Tolerate `Sec-WebSocket-Extensions` offers. Extensions are never
    /// negotiated; offers are ignored rather than refused.
    pub allow_extensions: bool,
    /// Idle timeout for the upgraded connection; zero disables it.
    pub idle_timeout: Duration,
}

/// The processor's verdict, delivered to the connection task.
#[derive(Debug)]
pub enum UpgradeDecision {
    /// Complete the handshake under the given terms.
    Accept {
        /// Handshake terms.
        terms: AcceptTerms,
        /// Resolves once the `101` is written and the session is live.
        reply: oneshot::Sender<Result<WebSocketSession>>,
    },
    /// Refuse the handshake: send a close frame and shut the connection down.
    Cancel {
        /// Close status code.
        code: u16,
        /// Close reason.
        reason: String,
        /// Resolves once the close frame is on the wire.
        done: oneshot::Sender<()>,
    },
}

/// A pending upgrade handshake.
#[derive(Debug)]
pub struct UpgradeOffer {
    connection_id: ConnectionId,
    url: String,
    requested_subprotocols: Vec<String>,
    decision: oneshot::Sender<UpgradeDecision>,
}

impl UpgradeOffer {
    /// Create an offer for the given pending handshake. The connection task
    /// keeps the receiving end of `decision`.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        url: impl Into<String>,
        requested_subprotocols: Vec<String>,
        decision: oneshot::Sender<UpgradeDecision>,
    ) -> Self {
        Self {
            connection_id,
            url: url.into(),
            requested_subprotocols,
            decision,
        }
    }

    /// Identity of the connection requesting the upgrade.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// The URL being upgraded, `ws://` or `wss://` per the listener's
    /// security flag.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sub-protocols the client offered, in its preference order.
    #[must_use]
    pub fn requested_subprotocols(&self) -> &[String] {
        &self.requested_subprotocols
    }

    /// Accept the upgrade.
    ///
    /// `subprotocols` is the caller's supported list in preference order; an
    /// empty list accepts any offer without naming a sub-protocol. A non-zero
    /// `idle_timeout` re-arms the connection's idle timer; zero disables it.
    ///
    /// Resolves with the live session once the `101 Switching Protocols`
    /// response is written. Fails with [`TransportError::Handshake`] when no
    /// sub-protocol overlaps or the connection died mid-handshake.
    pub async fn accept(
        self,
        subprotocols: Vec<String>,
        allow_extensions: bool,
        idle_timeout: Duration,
    ) -> Result<WebSocketSession> {
        let (reply, reply_rx) = oneshot::channel();
        let decision = UpgradeDecision::Accept {
            terms: AcceptTerms {
                subprotocols,
                allow_extensions,
                idle_timeout,
            },
            reply,
        };
        if self.decision.send(decision).is_err() {
            return Err(TransportError::Handshake(
                "connection closed before the upgrade decision".into(),
            ));
        }
        reply_rx.await.map_err(|_| {
            TransportError::Handshake("connection closed during the handshake".into())
        })?
    }

    /// Refuse the upgrade: a close frame with `code` and `reason` is sent and
    /// the connection is shut down. Best-effort; a connection that already
    /// died needs no teardown.
    pub async fn cancel(self, code: u16, reason: impl Into<String>) {
        let (done, done_rx) = oneshot::channel();
        let decision = UpgradeDecision::Cancel {
            code,
            reason: reason.into(),
            done,
        };
        if self.decision.send(decision).is_err() {
            debug!("upgrade cancel after connection closed");
            return;
        }
        let _ = done_rx.await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
