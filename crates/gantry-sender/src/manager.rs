//! Pool registry and inbound-session binding table.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use gantry_core::errors::{Result, TransportError};
use gantry_core::ids::ConnectionId;
use tracing::debug;

use crate::channel::TargetChannel;
use crate::config::PoolConfig;
use crate::pool::{PooledConnection, RoutePool};
use crate::route::HttpRoute;

/// Registry of per-route pools plus the binding table that ties an outbound
/// channel to the inbound session driving it.
///
/// Pools are created on first use and shared; distinct routes never contend.
/// The binding table enforces at most one channel per
/// `(inbound session, route)` pair.
pub struct ConnectionManager {
    config: PoolConfig,
    pools: DashMap<HttpRoute, Arc<RoutePool>>,
    bindings: DashMap<(ConnectionId, HttpRoute), TargetChannel>,
}

impl ConnectionManager {
    /// Create a registry whose pools all share `config`.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: DashMap::new(),
            bindings: DashMap::new(),
        }
    }

    /// Check out a connection to `route`, creating its pool on first use.
    pub async fn acquire(&self, route: &HttpRoute) -> Result<PooledConnection> {
        let pool = {
            let entry = self
                .pools
                .entry(route.clone())
                .or_insert_with(|| Arc::new(RoutePool::new(route.clone(), self.config.clone())));
            Arc::clone(entry.value())
        };
        pool.acquire().await
    }

    /// Bind `channel` to `(source, route)`. Fails with
    /// [`TransportError::AlreadyBound`] when a channel is already bound there.
    pub fn bind(
        &self,
        source: &ConnectionId,
        route: &HttpRoute,
        channel: TargetChannel,
    ) -> Result<()> {
        match self.bindings.entry((source.clone(), route.clone())) {
            Entry::Occupied(_) => Err(TransportError::AlreadyBound {
                route: route.to_string(),
            }),
            Entry::Vacant(slot) => {
                let _ = slot.insert(channel);
                Ok(())
            }
        }
    }

    /// The channel bound to `(source, route)`, if any.
    #[must_use]
    pub fn bound_channel(&self, source: &ConnectionId, route: &HttpRoute) -> Option<TargetChannel> {
        self.bindings
            .get(&(source.clone(), route.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Remove the binding for `(source, route)`, returning the channel.
    pub fn unbind(&self, source: &ConnectionId, route: &HttpRoute) -> Option<TargetChannel> {
        self.bindings
            .remove(&(source.clone(), route.clone()))
            .map(|(_, channel)| channel)
    }

    /// Remove the binding for `(source, route)` only if it still holds
    /// `channel`. Returns whether a binding was removed.
    pub fn unbind_channel(
        &self,
        source: &ConnectionId,
        route: &HttpRoute,
        channel: &TargetChannel,
    ) -> bool {
        self.bindings
            .remove_if(&(source.clone(), route.clone()), |_, bound| {
                TargetChannel::ptr_eq(bound, channel)
            })
            .is_some()
    }

    /// Drop every binding owned by `source`, canceling in-flight exchanges
    /// and returning or closing their connections. Called when the inbound
    /// connection goes away.
    pub fn release_source(&self, source: &ConnectionId) {
        self.bindings.retain(|(bound_source, route), channel| {
            if bound_source == source {
                debug!(connection_id = %source, route = %route, "releasing bound channel");
                channel.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Number of routes with a live pool.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of live bindings.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
