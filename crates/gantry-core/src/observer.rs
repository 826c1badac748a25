//! Lifecycle observation hooks.
//!
//! A [`TransportObserver`] sees connection and message lifecycle events for
//! metrics and diagnostics. Every method has a no-op default, hooks are
//! side-effect-only, and nothing in the transport ever branches on what an
//! observer does. Code paths that take an observer receive one explicitly;
//! [`NoopObserver`] stands in when none is configured.

use std::net::SocketAddr;

use crate::ids::ConnectionId;
use crate::message::TransportMessage;

/// Observer of transport lifecycle events.
pub trait TransportObserver: Send + Sync {
    /// An inbound connection was accepted.
    fn on_connection_open(&self, _id: &ConnectionId, _remote: SocketAddr) {}

    /// An inbound connection finished, cleanly or not.
    fn on_connection_close(&self, _id: &ConnectionId) {}

    /// A complete request was assembled and is about to be dispatched.
    fn on_request_received(&self, _id: &ConnectionId, _message: &TransportMessage) {}

    /// A response was written back to the inbound peer.
    fn on_response_sent(&self, _id: &ConnectionId, _message: &TransportMessage) {}

    /// An outbound connection to a target route was established.
    fn on_target_connection_open(&self, _route: &str) {}

    /// An outbound connection to a target route was closed or invalidated.
    fn on_target_connection_close(&self, _route: &str) {}
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl TransportObserver for NoopObserver {}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
