//! Destination route identity.

use std::fmt;

use gantry_core::errors::{Result, TransportError};
use gantry_core::message::{TransportMessage, properties};
use serde::{Deserialize, Serialize};

/// A pooled destination. Two messages share a pool exactly when their routes
/// compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpRoute {
    /// Destination host name or address.
    pub host: String,
    /// Destination port.
    pub port: u16,
    /// Whether the destination expects a TLS-wrapped stream.
    pub secure: bool,
}

impl HttpRoute {
    /// Create a route.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// The destination of a message.
    ///
    /// Explicit `host`/`port` properties win; otherwise the `Host` header is
    /// parsed. The port defaults to 80 (443 when `secure`) when neither
    /// names one.
    pub fn from_message(message: &TransportMessage) -> Result<Self> {
        let secure = message.property_bool(properties::SECURE).unwrap_or(false);
        let default_port = if secure { 443 } else { 80 };

        if let Some(host) = message.property_str(properties::HOST) {
            let port = match message.property_u64(properties::PORT) {
                Some(value) => u16::try_from(value).map_err(|_| {
                    TransportError::InvalidMessage(format!("port out of range: {value}"))
                })?,
                None => default_port,
            };
            return Ok(Self::new(host, port, secure));
        }

        if let Some(authority) = message.headers().get("Host") {
            return Self::from_authority(authority, default_port, secure);
        }

        Err(TransportError::InvalidMessage(
            "no destination route: set host/port properties or a Host header".to_string(),
        ))
    }

    fn from_authority(authority: &str, default_port: u16, secure: bool) -> Result<Self> {
        if let Some((host, port)) = authority.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return Ok(Self::new(host, port, secure));
            }
        }
        Ok(Self::new(authority, default_port, secure))
    }

    /// `host:port`, the form used for a `Host` header.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for HttpRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
