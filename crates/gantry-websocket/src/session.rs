//! Session handles for an upgraded connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use gantry_core::errors::{Result, TransportError};
use gantry_core::ids::ConnectionId;
use tokio::sync::mpsc;

/// A frame queued for the connection task to write.
#[derive(Debug)]
pub enum OutboundFrame {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    /// Start the closing handshake.
    Close {
        /// Close status code (RFC 6455 §7.4).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

#[derive(Debug)]
struct SessionInner {
    connection_id: ConnectionId,
    url: String,
    subprotocol: Option<String>,
    open: AtomicBool,
    outbound: mpsc::Sender<OutboundFrame>,
}

/// Shared handle to an upgraded connection.
///
/// Cloning is cheap; all clones refer to the same connection. Sends go
/// through a bounded queue drained by the connection's own task, so callers
/// on any task get backpressure instead of unbounded buffering.
#[derive(Clone, Debug)]
pub struct WebSocketSession {
    inner: Arc<SessionInner>,
}

impl WebSocketSession {
    /// Create the handle for a freshly upgraded connection.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        url: impl Into<String>,
        subprotocol: Option<String>,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                connection_id,
                url: url.into(),
                subprotocol,
                open: AtomicBool::new(true),
                outbound,
            }),
        }
    }

    /// Identity of the underlying connection.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.inner.connection_id
    }

    /// The URL negotiated at upgrade time (`ws://...` or `wss://...`).
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Sub-protocol agreed during the handshake, if any.
    #[must_use]
    pub fn subprotocol(&self) -> Option<&str> {
        self.inner.subprotocol.as_deref()
    }

    /// Whether the session is still open for sending.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Queue a text message for the peer.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(OutboundFrame::Text(text.into())).await
    }

    /// Queue a binary message for the peer.
    pub async fn send_binary(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(OutboundFrame::Binary(payload.into())).await
    }

    /// Start the closing handshake with the given status code and reason.
    ///
    /// The session is unusable for sending afterwards; the connection task
    /// finishes the close exchange and tears the connection down.
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<()> {
        let result = self
            .send(OutboundFrame::Close {
                code,
                reason: reason.into(),
            })
            .await;
        self.inner.open.store(false, Ordering::Release);
        result
    }

    async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Mark the session closed. Called by the connection driver on teardown.
    pub fn mark_closed(&self) {
        self.inner.open.store(false, Ordering::Release);
    }

    /// A weak reference suitable for embedding in messages.
    #[must_use]
    pub fn downgrade(&self) -> SessionRef {
        SessionRef {
            connection_id: self.inner.connection_id.clone(),
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Weak back-reference from a message to its session.
///
/// Correlation only: it never keeps the connection alive. The connection id
/// stays readable after the session is gone.
#[derive(Clone, Debug)]
pub struct SessionRef {
    connection_id: ConnectionId,
    inner: Weak<SessionInner>,
}

impl SessionRef {
    /// Identity of the connection this message arrived on.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// The live session, while the connection task still holds it.
    #[must_use]
    pub fn upgrade(&self) -> Option<WebSocketSession> {
        self.inner
            .upgrade()
            .map(|inner| WebSocketSession { inner })
    }

    /// Whether the session is still alive and open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.upgrade().is_some_and(|session| session.is_open())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
