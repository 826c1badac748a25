//! The gateway send path: forward a message to its destination route over a
//! pooled connection and correlate the response back through its callback.

use std::sync::Arc;

use gantry_core::callback::ResponseCallback;
use gantry_core::errors::{Result, TransportError};
use gantry_core::ids::ConnectionId;
use gantry_core::message::{TransportMessage, properties};
use gantry_core::observer::{NoopObserver, TransportObserver};
use tracing::warn;

use crate::channel::TargetChannel;
use crate::manager::ConnectionManager;
use crate::route::HttpRoute;

/// Outbound counterpart to the listener.
///
/// A processor hands it the inbound message (carrying destination properties
/// or a `Host` header) together with the inbound callback; the connector
/// runs the upstream exchange on a pooled connection bound to the source
/// connection and completes the callback with the upstream response.
pub struct HttpClientConnector {
    manager: Arc<ConnectionManager>,
    observer: Arc<dyn TransportObserver>,
}

impl HttpClientConnector {
    /// Create a connector over `manager` with no observer.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Attach a lifecycle observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The registry this connector draws connections from.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Forward `message` upstream and complete `callback` with the response.
    ///
    /// On failure the callback is dropped uncompleted, which the inbound
    /// session maps to a terminating error response.
    pub async fn send(&self, message: TransportMessage, callback: ResponseCallback) {
        match self.forward(&message).await {
            Ok(response) => callback.complete(response),
            Err(error) => {
                warn!(error = %error, "gateway exchange failed");
                drop(callback);
            }
        }
    }

    /// Forward `message` upstream and return the response.
    ///
    /// Reuses the channel already bound to `(source connection, route)` when
    /// one exists; otherwise acquires a pooled connection and binds a new
    /// channel. A channel whose connection did not survive the exchange is
    /// unbound afterwards.
    pub async fn forward(&self, message: &TransportMessage) -> Result<TransportMessage> {
        let route = HttpRoute::from_message(message)?;
        let source = message
            .property_str(properties::CONNECTION_ID)
            .map(ConnectionId::from)
            .unwrap_or_default();

        let channel = match self.manager.bound_channel(&source, &route) {
            Some(channel) => channel,
            None => {
                let conn = self.manager.acquire(&route).await?;
                self.observer.on_target_connection_open(&route.to_string());
                let channel = TargetChannel::new(source.clone(), route.clone(), conn);
                if let Err(error) = self.manager.bind(&source, &route, channel.clone()) {
                    match error {
                        // raced with another exchange; run this one unbound
                        TransportError::AlreadyBound { .. } => {}
                        other => return Err(other),
                    }
                }
                channel
            }
        };

        let result = channel.exchange(message).await;
        if !channel.has_connection() && self.manager.unbind_channel(&source, &route, &channel) {
            self.observer.on_target_connection_close(&route.to_string());
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
