//! Upgrade negotiation, decoupled from socket I/O.
//!
//! [`negotiate`] validates the upgrade head, parks the handshake behind an
//! [`UpgradeOffer`], and waits for the handler's verdict. The caller owns the
//! socket and turns the returned [`UpgradeStep`] into wire traffic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gantry_core::errors::Result;
use gantry_core::ids::ConnectionId;
use gantry_core::message::TransportMessage;
use gantry_websocket::handler::WebSocketHandler;
use gantry_websocket::handshake;
use gantry_websocket::message::WsMessage;
use gantry_websocket::offer::{AcceptTerms, UpgradeDecision, UpgradeOffer};
use gantry_websocket::session::WebSocketSession;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::warn;

/// An upgrade request pulled off the wire, plus the connection identity the
/// offer is issued under.
pub(crate) struct UpgradeRequest {
    pub message: TransportMessage,
    pub connection_id: ConnectionId,
    pub local_addr: SocketAddr,
    pub secure: bool,
    pub handshake_timeout: Duration,
}

/// What the connection task does next with the parked handshake.
pub(crate) enum UpgradeStep {
    /// Write a plain HTTP refusal; the connection stays usable.
    Reject {
        status: u16,
        /// Advertise the supported version alongside a `426`.
        version_header: bool,
    },
    /// Drop the connection without writing anything.
    CloseSilently,
    /// Handler refused: put a close frame on the wire, then shut down.
    Cancel {
        code: u16,
        reason: String,
        done: oneshot::Sender<()>,
    },
    /// Handler accepted: complete the `101` handshake under these terms.
    Accept {
        terms: AcceptTerms,
        reply: oneshot::Sender<Result<WebSocketSession>>,
        key: String,
        offered: Vec<String>,
        url: String,
    },
}

/// Validate the head, deliver the offer, await the verdict.
///
/// The handler runs on its own task; deciding the offer from inside the
/// `on_message` call would otherwise deadlock against the connection task
/// parked here.
pub(crate) async fn negotiate(
    request: UpgradeRequest,
    handler: Option<Arc<dyn WebSocketHandler>>,
) -> UpgradeStep {
    let Some(handler) = handler else {
        return UpgradeStep::Reject {
            status: 400,
            version_header: false,
        };
    };
    if request.message.body_len() > 0 {
        return UpgradeStep::Reject {
            status: 400,
            version_header: false,
        };
    }
    let headers = request.message.headers();
    if !handshake::version_supported(headers) {
        return UpgradeStep::Reject {
            status: 426,
            version_header: true,
        };
    }
    let key = match handshake::validate_upgrade(headers) {
        Ok(key) => key.to_owned(),
        Err(_) => {
            return UpgradeStep::Reject {
                status: 400,
                version_header: false,
            };
        }
    };
    let offered = handshake::offered_subprotocols(headers);
    let url = handshake::request_url(
        request.secure,
        headers.get("Host"),
        &request.local_addr.ip().to_string(),
        request.local_addr.port(),
        request.message.target().unwrap_or("/"),
    );

    let (decision_tx, decision_rx) = oneshot::channel();
    let offer = UpgradeOffer::new(
        request.connection_id.clone(),
        url.clone(),
        offered.clone(),
        decision_tx,
    );
    drop(tokio::spawn(async move {
        if let Err(error) = handler.on_message(WsMessage::Init(offer)).await {
            warn!(error = %error, "websocket handler failed on upgrade offer");
        }
    }));

    match timeout(request.handshake_timeout, decision_rx).await {
        // No verdict in time: the handshake is void and so is the connection.
        Err(_) => UpgradeStep::CloseSilently,
        // Offer dropped undecided: refuse, keep the connection for plain HTTP.
        Ok(Err(_)) => UpgradeStep::Reject {
            status: 400,
            version_header: false,
        },
        Ok(Ok(UpgradeDecision::Cancel { code, reason, done })) => {
            UpgradeStep::Cancel { code, reason, done }
        }
        Ok(Ok(UpgradeDecision::Accept { terms, reply })) => UpgradeStep::Accept {
            terms,
            reply,
            key,
            offered,
            url,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
