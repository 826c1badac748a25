//! Shared wiring handed to every inbound connection.

use std::sync::Arc;

use gantry_core::observer::{NoopObserver, TransportObserver};
use gantry_core::processor::{MessageProcessor, RequestValidator};
use gantry_sender::manager::ConnectionManager;
use gantry_websocket::handler::WebSocketHandler;

/// Everything a connection task needs beyond its socket: the processor that
/// consumes messages, optional request validation, the WebSocket handler (no
/// handler means upgrades are refused), lifecycle observation, and the
/// outbound connection manager whose per-source bindings are released when
/// the connection closes.
#[derive(Clone)]
pub struct TransportContext {
    processor: Arc<dyn MessageProcessor>,
    validator: Option<Arc<dyn RequestValidator>>,
    ws_handler: Option<Arc<dyn WebSocketHandler>>,
    observer: Arc<dyn TransportObserver>,
    manager: Option<Arc<ConnectionManager>>,
}

impl TransportContext {
    /// Context with only a processor; everything else defaults off.
    #[must_use]
    pub fn new(processor: Arc<dyn MessageProcessor>) -> Self {
        Self {
            processor,
            validator: None,
            ws_handler: None,
            observer: Arc::new(NoopObserver),
            manager: None,
        }
    }

    /// Veto requests before they reach the processor.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn RequestValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Enable WebSocket upgrades, delivered to `handler`.
    #[must_use]
    pub fn with_websocket_handler(mut self, handler: Arc<dyn WebSocketHandler>) -> Self {
        self.ws_handler = Some(handler);
        self
    }

    /// Observe connection and message lifecycle events.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Release this listener's outbound bindings on connection close.
    #[must_use]
    pub fn with_manager(mut self, manager: Arc<ConnectionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// The configured processor.
    #[must_use]
    pub fn processor(&self) -> &Arc<dyn MessageProcessor> {
        &self.processor
    }

    /// The configured validator, if any.
    #[must_use]
    pub fn validator(&self) -> Option<&Arc<dyn RequestValidator>> {
        self.validator.as_ref()
    }

    /// The configured WebSocket handler, if any.
    #[must_use]
    pub fn ws_handler(&self) -> Option<&Arc<dyn WebSocketHandler>> {
        self.ws_handler.as_ref()
    }

    /// The configured observer.
    #[must_use]
    pub fn observer(&self) -> &Arc<dyn TransportObserver> {
        &self.observer
    }

    /// The configured connection manager, if any.
    #[must_use]
    pub fn manager(&self) -> Option<&Arc<ConnectionManager>> {
        self.manager.as_ref()
    }
}

impl std::fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportContext")
            .field("validator", &self.validator.is_some())
            .field("ws_handler", &self.ws_handler.is_some())
            .field("manager", &self.manager.is_some())
            .finish_non_exhaustive()
    }
}
