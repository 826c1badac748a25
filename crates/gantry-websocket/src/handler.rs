//! The duplex contract for upgraded traffic.

use async_trait::async_trait;
use gantry_core::errors::Result;

use crate::message::WsMessage;

/// Receives every message on an upgraded connection, starting with the
/// [`WsMessage::Init`] upgrade offer.
///
/// `Init` offers are delivered on their own task, so deciding them inline
/// with `accept`/`cancel` is safe. Everything after the upgrade is delivered
/// from the connection's task; implementations should return promptly and
/// spawn long-running work. An error closes the connection.
#[async_trait]
pub trait WebSocketHandler: Send + Sync {
    /// Receive one message.
    async fn on_message(&self, message: WsMessage) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
