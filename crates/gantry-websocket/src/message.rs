//! The closed message model delivered to a [`WebSocketHandler`].
//!
//! Every message a handler can see is one of the variants of [`WsMessage`];
//! there is no open-ended frame type to downcast. Payload release is plain
//! ownership: the consuming `into_*` accessors move the buffer out exactly
//! once, and dropping a message drops its buffer.
//!
//! [`WebSocketHandler`]: crate::handler::WebSocketHandler

use bytes::Bytes;
use gantry_core::ids::ConnectionId;

use crate::offer::UpgradeOffer;
use crate::session::SessionRef;

/// A message on an upgraded (or upgrading) connection.
#[derive(Debug)]
pub enum WsMessage {
    /// An upgrade handshake waiting for a decision.
    Init(UpgradeOffer),
    /// A text frame from the peer.
    Text(TextMessage),
    /// A binary frame from the peer.
    Binary(BinaryMessage),
    /// A control signal: ping, pong, or local idle expiry.
    Control(ControlMessage),
    /// The peer started or answered the closing handshake.
    Close(CloseMessage),
}

impl WsMessage {
    /// Identity of the connection the message belongs to.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::Init(offer) => offer.connection_id(),
            Self::Text(m) => m.session().connection_id(),
            Self::Binary(m) => m.session().connection_id(),
            Self::Control(m) => m.session().connection_id(),
            Self::Close(m) => m.session().connection_id(),
        }
    }
}

/// A text frame.
#[derive(Debug)]
pub struct TextMessage {
    session: SessionRef,
    text: String,
    last: bool,
}

impl TextMessage {
    /// Wrap a decoded text frame.
    #[must_use]
    pub fn new(session: SessionRef, text: impl Into<String>, last: bool) -> Self {
        Self {
            session,
            text: text.into(),
            last,
        }
    }

    /// Borrow the payload.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Take the payload.
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    /// Whether this is the final fragment of its message.
    ///
    /// The protocol layer coalesces fragmented traffic before delivery, so
    /// inbound messages always report `true`; the flag exists for callers
    /// that construct fragments themselves.
    #[must_use]
    pub fn is_final_fragment(&self) -> bool {
        self.last
    }

    /// The session this frame arrived on.
    #[must_use]
    pub fn session(&self) -> &SessionRef {
        &self.session
    }
}

/// A binary frame.
#[derive(Debug)]
pub struct BinaryMessage {
    session: SessionRef,
    payload: Bytes,
    last: bool,
}

impl BinaryMessage {
    /// Wrap a decoded binary frame.
    #[must_use]
    pub fn new(session: SessionRef, payload: impl Into<Bytes>, last: bool) -> Self {
        Self {
            session,
            payload: payload.into(),
            last,
        }
    }

    /// Borrow the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Whether this is the final fragment of its message.
    #[must_use]
    pub fn is_final_fragment(&self) -> bool {
        self.last
    }

    /// The session this frame arrived on.
    #[must_use]
    pub fn session(&self) -> &SessionRef {
        &self.session
    }
}

/// What a [`ControlMessage`] signals.
#[derive(Debug)]
pub enum ControlSignal {
    /// Peer ping; the protocol layer has already answered with a pong.
    Ping(Bytes),
    /// Peer pong.
    Pong(Bytes),
    /// The connection's idle timer expired. Owns no buffer.
    IdleTimeout,
}

/// A control signal on an open session.
#[derive(Debug)]
pub struct ControlMessage {
    session: SessionRef,
    signal: ControlSignal,
}

impl ControlMessage {
    /// A peer ping with its application payload.
    #[must_use]
    pub fn ping(session: SessionRef, payload: Bytes) -> Self {
        Self {
            session,
            signal: ControlSignal::Ping(payload),
        }
    }

    /// A peer pong with its application payload.
    #[must_use]
    pub fn pong(session: SessionRef, payload: Bytes) -> Self {
        Self {
            session,
            signal: ControlSignal::Pong(payload),
        }
    }

    /// Local idle expiry. Carries no payload.
    #[must_use]
    pub fn idle_timeout(session: SessionRef) -> Self {
        Self {
            session,
            signal: ControlSignal::IdleTimeout,
        }
    }

    /// The signal carried by this message.
    #[must_use]
    pub fn signal(&self) -> &ControlSignal {
        &self.signal
    }

    /// Whether this message reports idle expiry.
    #[must_use]
    pub fn is_idle_timeout(&self) -> bool {
        matches!(self.signal, ControlSignal::IdleTimeout)
    }

    /// Borrow the payload; empty for [`ControlSignal::IdleTimeout`].
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match &self.signal {
            ControlSignal::Ping(p) | ControlSignal::Pong(p) => p,
            ControlSignal::IdleTimeout => &[],
        }
    }

    /// Take the payload; empty for [`ControlSignal::IdleTimeout`], so its
    /// release is a no-op.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        match self.signal {
            ControlSignal::Ping(p) | ControlSignal::Pong(p) => p,
            ControlSignal::IdleTimeout => Bytes::new(),
        }
    }

    /// The session this signal belongs to.
    #[must_use]
    pub fn session(&self) -> &SessionRef {
        &self.session
    }
}

/// A close frame.
#[derive(Debug)]
pub struct CloseMessage {
    session: SessionRef,
    code: Option<u16>,
    reason: String,
}

impl CloseMessage {
    /// Wrap a decoded close frame. `code` is absent when the peer sent a
    /// bare close without a status.
    #[must_use]
    pub fn new(session: SessionRef, code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            session,
            code,
            reason: reason.into(),
        }
    }

    /// Close status code, if the peer supplied one.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    /// Close reason; empty when the peer gave none.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The session being closed.
    #[must_use]
    pub fn session(&self) -> &SessionRef {
        &self.session
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
