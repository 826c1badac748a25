//! RFC 6455 handshake helpers.
//!
//! Pure functions over the request head; the connection task in the listener
//! crate owns the actual wire exchange.

use gantry_core::errors::{Result, TransportError};
use gantry_core::headers::Headers;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

/// The only protocol version served (RFC 6455).
pub const WEBSOCKET_VERSION: &str = "13";

/// Whether a request head asks for a WebSocket upgrade.
///
/// Token matching is case-insensitive and accepts comma-lists, so
/// `Connection: keep-alive, Upgrade` qualifies; `Upgrade: h2c` does not.
#[must_use]
pub fn is_upgrade_request(method: &str, headers: &Headers) -> bool {
    method.eq_ignore_ascii_case("GET")
        && headers.has_token("Connection", "upgrade")
        && headers.has_token("Upgrade", "websocket")
}

/// Whether the request names the protocol version this transport serves.
///
/// Requests with any other version get `426 Upgrade Required` advertising
/// [`WEBSOCKET_VERSION`].
#[must_use]
pub fn version_supported(headers: &Headers) -> bool {
    headers.get("Sec-WebSocket-Version").map(str::trim) == Some(WEBSOCKET_VERSION)
}

/// Validate an upgrade request head, returning the client's handshake key.
pub fn validate_upgrade(headers: &Headers) -> Result<&str> {
    let key = headers.get("Sec-WebSocket-Key").ok_or_else(|| {
        TransportError::Handshake("missing Sec-WebSocket-Key".to_string())
    })?;
    match headers.get("Sec-WebSocket-Version") {
        Some(version) if version.trim() == WEBSOCKET_VERSION => Ok(key),
        Some(version) => Err(TransportError::Handshake(format!(
            "unsupported Sec-WebSocket-Version: {version}"
        ))),
        None => Err(TransportError::Handshake(
            "missing Sec-WebSocket-Version".to_string(),
        )),
    }
}

/// The `Sec-WebSocket-Accept` value for a client key.
#[must_use]
pub fn accept_key(key: &str) -> String {
    derive_accept_key(key.as_bytes())
}

/// Sub-protocols the client offered, split out of any number of
/// `Sec-WebSocket-Protocol` headers, in offer order.
#[must_use]
pub fn offered_subprotocols(headers: &Headers) -> Vec<String> {
    headers
        .get_all("Sec-WebSocket-Protocol")
        .flat_map(|value| value.split(','))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Select the sub-protocol for the `101` response.
///
/// The first client-offered protocol present in `supported` wins. When
/// either side names none, the handshake proceeds without a sub-protocol.
/// Both sides naming protocols with no overlap is a handshake failure.
pub fn select_subprotocol(offered: &[String], supported: &[String]) -> Result<Option<String>> {
    if offered.is_empty() || supported.is_empty() {
        return Ok(None);
    }
    offered
        .iter()
        .find(|candidate| supported.contains(candidate))
        .cloned()
        .map(Some)
        .ok_or_else(|| {
            TransportError::Handshake(format!(
                "no sub-protocol overlap, client offered: {}",
                offered.join(", ")
            ))
        })
}

/// The URL a session reports, built from the request head and listener
/// identity. Prefers the `Host` header; falls back to the listener's own
/// address.
#[must_use]
pub fn request_url(
    secure: bool,
    host: Option<&str>,
    local_host: &str,
    local_port: u16,
    target: &str,
) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    match host {
        Some(host) => format!("{scheme}://{host}{target}"),
        None => format!("{scheme}://{local_host}:{local_port}{target}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
