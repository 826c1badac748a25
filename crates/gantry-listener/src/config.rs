//! Listener configuration.

use std::time::Duration;

use gantry_core::ids::ListenerId;
use serde::{Deserialize, Serialize};

/// Configuration for one listening interface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address (default `127.0.0.1`).
    pub host: String,
    /// Bind port; `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Identity stamped on every message this interface accepts.
    pub listener_id: ListenerId,
    /// Whether connections carry a negotiated security context. Messages are
    /// stamped accordingly; transport security itself is provisioned outside
    /// the listener.
    pub secure: bool,
    /// Ceiling on concurrently open inbound connections.
    pub max_connections: usize,
    /// Seconds a connection may sit with no inbound traffic before it is
    /// closed; `0` disables the timer.
    pub idle_timeout_secs: u64,
    /// Seconds a pending WebSocket upgrade may wait for a decision.
    pub handshake_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            listener_id: ListenerId::from("default"),
            secure: false,
            max_connections: 1024,
            idle_timeout_secs: 60,
            handshake_timeout_secs: 10,
        }
    }
}

impl ListenerConfig {
    /// `idle_timeout_secs` as a [`Duration`]; `None` when disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// `handshake_timeout_secs` as a [`Duration`].
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}
