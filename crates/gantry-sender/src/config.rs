//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What `acquire` does when a route's pool is at capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedAction {
    /// Wait up to `max_wait_ms` for a checkout to end, then fail.
    Block,
    /// Fail immediately.
    Fail,
}

/// Configuration shared by every per-route pool in a registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hard ceiling of checked-out connections per route.
    pub max_active: usize,
    /// Idle connections kept per route; surplus returns are closed.
    pub max_idle: usize,
    /// How long a blocked `acquire` waits, in milliseconds.
    pub max_wait_ms: u64,
    /// Idle age after which a pooled connection is discarded, in seconds.
    pub idle_ttl_secs: u64,
    /// Outbound TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Behavior at capacity (default [`ExhaustedAction::Block`]).
    pub exhausted_action: ExhaustedAction,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 10,
            max_wait_ms: 30_000,
            idle_ttl_secs: 300,
            connect_timeout_ms: 15_000,
            exhausted_action: ExhaustedAction::Block,
        }
    }
}

impl PoolConfig {
    /// `max_wait_ms` as a [`Duration`].
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// `idle_ttl_secs` as a [`Duration`].
    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    /// `connect_timeout_ms` as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
