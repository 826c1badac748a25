//! Bounded per-route connection pool.
//!
//! Capacity is a hard ceiling enforced by a semaphore: a permit is held for
//! the whole time a connection is checked out. Checked-out connections are
//! exclusively owned through [`PooledConnection`]; dropping the wrapper
//! always returns the connection or closes it, so a leak of capacity is
//! structurally impossible.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use gantry_core::errors::{Result, TransportError};
use gantry_http1::client::ClientCodec;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::config::{ExhaustedAction, PoolConfig};
use crate::route::HttpRoute;

struct IdleConnection {
    framed: Framed<TcpStream, ClientCodec>,
    parked_at: Instant,
}

/// Pool of connections to one route.
pub struct RoutePool {
    route: HttpRoute,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
}

impl RoutePool {
    /// Create an empty pool for `route`.
    #[must_use]
    pub fn new(route: HttpRoute, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_active));
        Self {
            route,
            config,
            permits,
            idle: Mutex::new(VecDeque::new()),
        }
    }

    /// The route this pool serves.
    #[must_use]
    pub fn route(&self) -> &HttpRoute {
        &self.route
    }

    /// Idle connections currently parked.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Check out a connection, reusing a validated idle one when possible.
    ///
    /// At capacity this blocks up to `max_wait` or fails immediately,
    /// per [`ExhaustedAction`].
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        let permit = self.checkout_permit().await?;
        while let Some(idle) = self.idle.lock().pop_front() {
            if self.still_usable(&idle) {
                trace!(route = %self.route, "reusing pooled connection");
                return Ok(PooledConnection::new(Arc::clone(self), permit, idle.framed));
            }
            debug!(route = %self.route, "discarding stale pooled connection");
        }
        let framed = self.connect().await?;
        debug!(route = %self.route, "opened connection");
        Ok(PooledConnection::new(Arc::clone(self), permit, framed))
    }

    async fn checkout_permit(&self) -> Result<OwnedSemaphorePermit> {
        let semaphore = Arc::clone(&self.permits);
        match self.config.exhausted_action {
            ExhaustedAction::Fail => semaphore
                .try_acquire_owned()
                .map_err(|_| self.exhausted()),
            ExhaustedAction::Block => timeout(self.config.max_wait(), semaphore.acquire_owned())
                .await
                .map_err(|_| self.exhausted())?
                .map_err(|_| self.exhausted()),
        }
    }

    fn exhausted(&self) -> TransportError {
        TransportError::PoolExhausted {
            route: self.route.to_string(),
        }
    }

    /// Whether a parked connection can still carry an exchange: young enough,
    /// and the peer has neither closed it nor spoken out of turn.
    fn still_usable(&self, idle: &IdleConnection) -> bool {
        if idle.parked_at.elapsed() >= self.config.idle_ttl() {
            return false;
        }
        if !idle.framed.read_buffer().is_empty() {
            return false;
        }
        let mut probe = [0u8; 1];
        match idle.framed.get_ref().try_read(&mut probe) {
            // readable while idle means closed (0) or unsolicited bytes
            Ok(_) => false,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }

    async fn connect(&self) -> Result<Framed<TcpStream, ClientCodec>> {
        if self.route.secure {
            return Err(TransportError::ConnectFailed {
                route: self.route.to_string(),
                message: "secure routes need an externally negotiated stream".to_string(),
            });
        }
        let stream = timeout(
            self.config.connect_timeout(),
            TcpStream::connect((self.route.host.as_str(), self.route.port)),
        )
        .await
        .map_err(|_| TransportError::ConnectFailed {
            route: self.route.to_string(),
            message: "connect timed out".to_string(),
        })?
        .map_err(|e| TransportError::ConnectFailed {
            route: self.route.to_string(),
            message: e.to_string(),
        })?;
        let _ = stream.set_nodelay(true);
        Ok(Framed::new(stream, ClientCodec::new()))
    }

    fn park_or_drop(&self, framed: Framed<TcpStream, ClientCodec>, reusable: bool) {
        if reusable && framed.read_buffer().is_empty() {
            let mut idle = self.idle.lock();
            if idle.len() < self.config.max_idle {
                idle.push_back(IdleConnection {
                    framed,
                    parked_at: Instant::now(),
                });
                return;
            }
        }
        trace!(route = %self.route, "closing connection instead of pooling");
    }
}

/// An exclusively owned, checked-out connection.
///
/// Holds its pool permit for its whole lifetime. On drop the connection is
/// parked for reuse, or closed if it was invalidated, exceeded the idle
/// ceiling, or has unread bytes.
pub struct PooledConnection {
    pool: Arc<RoutePool>,
    framed: Option<Framed<TcpStream, ClientCodec>>,
    reusable: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(
        pool: Arc<RoutePool>,
        permit: OwnedSemaphorePermit,
        framed: Framed<TcpStream, ClientCodec>,
    ) -> Self {
        Self {
            pool,
            framed: Some(framed),
            reusable: true,
            _permit: permit,
        }
    }

    /// The route this connection reaches.
    #[must_use]
    pub fn route(&self) -> &HttpRoute {
        self.pool.route()
    }

    /// The framed stream, present until drop.
    pub fn framed_mut(&mut self) -> Option<&mut Framed<TcpStream, ClientCodec>> {
        self.framed.as_mut()
    }

    /// Whether the connection will be parked on drop.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Record whether the completed exchange left the connection reusable.
    pub fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }

    /// Mark the connection broken; it is closed on drop and never pooled
    /// again.
    pub fn invalidate(&mut self) {
        self.reusable = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(framed) = self.framed.take() {
            self.pool.park_or_drop(framed, self.reusable);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
