//! Accept loop and listener lifecycle.

use std::net::SocketAddr;
use std::time::Duration;

use futures::future::join_all;
use gantry_core::errors::Result;
use gantry_core::ids::ConnectionId;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::connection::InboundSession;
use crate::context::TransportContext;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// A configured, not-yet-started listening interface.
#[derive(Debug)]
pub struct GantryListener {
    config: ListenerConfig,
    context: TransportContext,
}

impl GantryListener {
    /// Pair a configuration with the wiring its connections will use.
    #[must_use]
    pub fn new(config: ListenerConfig, context: TransportContext) -> Self {
        Self { config, context }
    }

    /// Bind the interface and start accepting connections.
    pub async fn start(self) -> Result<ListenerHandle> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(
            listener_id = %self.config.listener_id,
            %local_addr,
            "listener started"
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            local_addr,
            self.config,
            self.context,
            cancel.clone(),
        ));
        Ok(ListenerHandle {
            local_addr,
            cancel,
            task,
        })
    }
}

/// A running listener. Dropping the handle leaves the listener running;
/// [`ListenerHandle::shutdown`] stops it.
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// The bound address, with an OS-assigned port resolved.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and drain live connections.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            warn!(error = %error, "accept loop ended abnormally");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ListenerConfig,
    context: TransportContext,
    cancel: CancellationToken,
) {
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    loop {
        tasks.retain(|task| !task.is_finished());
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = cancel.cancelled() => break,
        };
        let (stream, peer_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!(error = %error, "accept failed");
                continue;
            }
        };
        if tasks.len() >= config.max_connections {
            warn!(%peer_addr, "connection limit reached, refusing");
            drop(stream);
            continue;
        }
        let _ = stream.set_nodelay(true);
        let connection_id = ConnectionId::new();
        debug!(connection_id = %connection_id, %peer_addr, "connection accepted");
        let session = InboundSession::new(
            stream,
            connection_id.clone(),
            config.clone(),
            context.clone(),
            local_addr,
            peer_addr,
        );
        tasks.push(tokio::spawn(async move {
            if let Err(error) = session.run().await {
                debug!(
                    connection_id = %connection_id,
                    error = %error,
                    "connection ended with error"
                );
            }
        }));
    }
    drain(tasks).await;
}

async fn drain(mut tasks: Vec<JoinHandle<()>>) {
    tasks.retain(|task| !task.is_finished());
    if tasks.is_empty() {
        return;
    }
    debug!(connections = tasks.len(), "draining connections");
    if timeout(SHUTDOWN_DRAIN, join_all(tasks.iter_mut()))
        .await
        .is_err()
    {
        warn!("drain window expired, aborting connections");
        for task in &tasks {
            task.abort();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
