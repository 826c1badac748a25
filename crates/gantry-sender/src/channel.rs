//! Outbound target channel: request/response exchanges over a checked-out
//! connection, bound to the inbound session that drives them.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use gantry_core::errors::{Result, TransportError};
use gantry_core::ids::ConnectionId;
use gantry_core::message::TransportMessage;
use gantry_http1::types::{RequestEvent, RequestHead, ResponseEvent, ResponseHead};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pool::PooledConnection;
use crate::route::HttpRoute;

struct ChannelInner {
    source: ConnectionId,
    route: HttpRoute,
    cancel: CancellationToken,
    conn: Mutex<Option<PooledConnection>>,
}

/// A channel to one route on behalf of one inbound session.
///
/// Holds the checked-out connection between exchanges so a keep-alive
/// upstream is reused. The connection leaves the channel after an exchange
/// that made it non-reusable; [`TargetChannel::has_connection`] tells the
/// caller it is time to unbind.
///
/// Clones share state; [`TargetChannel::cancel`] aborts an in-flight
/// exchange from any clone.
#[derive(Clone)]
pub struct TargetChannel {
    inner: Arc<ChannelInner>,
}

impl TargetChannel {
    /// Wrap a checked-out connection for `source`.
    #[must_use]
    pub fn new(source: ConnectionId, route: HttpRoute, conn: PooledConnection) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                source,
                route,
                cancel: CancellationToken::new(),
                conn: Mutex::new(Some(conn)),
            }),
        }
    }

    /// The inbound session this channel serves.
    #[must_use]
    pub fn source(&self) -> &ConnectionId {
        &self.inner.source
    }

    /// The destination route.
    #[must_use]
    pub fn route(&self) -> &HttpRoute {
        &self.inner.route
    }

    /// Whether a connection is parked in the channel, ready for an exchange.
    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.inner.conn.lock().is_some()
    }

    /// Whether [`TargetChannel::cancel`] was called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Whether two handles refer to the same channel.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Abort any in-flight exchange and close the held connection. The
    /// underlying connection is invalidated, never pooled again.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        if let Some(mut conn) = self.inner.conn.lock().take() {
            conn.invalidate();
        }
    }

    /// Run one request/response exchange.
    ///
    /// The request must carry a complete body. On success the connection is
    /// parked back in the channel when the response framing allows reuse;
    /// on failure or cancellation it is invalidated.
    pub async fn exchange(&self, request: &TransportMessage) -> Result<TransportMessage> {
        if self.inner.cancel.is_cancelled() {
            return Err(TransportError::Canceled);
        }
        if !request.body_complete() {
            return Err(TransportError::InvalidMessage(
                "outbound request body is not complete".to_string(),
            ));
        }
        let Some(mut conn) = self.inner.conn.lock().take() else {
            return Err(TransportError::ConnectionClosed);
        };

        let result = tokio::select! {
            result = run_exchange(&mut conn, request) => result,
            () = self.inner.cancel.cancelled() => Err(TransportError::Canceled),
        };

        match result {
            Ok((response, reusable)) => {
                debug!(
                    route = %self.inner.route,
                    status = response.status().unwrap_or(0),
                    reusable,
                    "exchange complete"
                );
                conn.set_reusable(reusable);
                if reusable {
                    *self.inner.conn.lock() = Some(conn);
                }
                Ok(response)
            }
            Err(error) => {
                conn.invalidate();
                Err(error)
            }
        }
    }
}

async fn run_exchange(
    conn: &mut PooledConnection,
    request: &TransportMessage,
) -> Result<(TransportMessage, bool)> {
    let head = build_request_head(request, conn.route())?;
    let framed = conn
        .framed_mut()
        .ok_or(TransportError::ConnectionClosed)?;

    framed.feed(RequestEvent::Head(head)).await?;
    for chunk in request.chunks() {
        framed.feed(RequestEvent::Chunk(chunk.clone())).await?;
    }
    framed.send(RequestEvent::End).await?;

    let mut response: Option<TransportMessage> = None;
    let mut reusable = false;
    loop {
        let Some(event) = framed.next().await else {
            return Err(TransportError::ConnectionClosed);
        };
        match event? {
            ResponseEvent::Head(head) => {
                reusable = head.keep_alive() && has_explicit_framing(&head);
                let mut message = TransportMessage::response(head.status);
                message.set_version(head.version);
                *message.headers_mut() = head.headers;
                response = Some(message);
            }
            ResponseEvent::Chunk(chunk) => {
                if let Some(message) = response.as_mut() {
                    message.append_chunk(chunk)?;
                }
            }
            ResponseEvent::End => break,
        }
    }

    let mut message = response.ok_or(TransportError::ConnectionClosed)?;
    message.finish_body();
    Ok((message, reusable))
}

/// A response body delimited only by connection close forbids reuse.
fn has_explicit_framing(head: &ResponseHead) -> bool {
    matches!(head.status, 100..=199 | 204 | 304)
        || head.headers.contains("Content-Length")
        || head.headers.has_token("Transfer-Encoding", "chunked")
}

fn build_request_head(message: &TransportMessage, route: &HttpRoute) -> Result<RequestHead> {
    let method = message.method().ok_or_else(|| {
        TransportError::InvalidMessage("outbound message has no method".to_string())
    })?;
    let target = message.target().ok_or_else(|| {
        TransportError::InvalidMessage("outbound message has no target".to_string())
    })?;
    let mut head = RequestHead::new(method, target);
    head.headers = message.headers().clone();
    if head.headers.get("Host").is_none() {
        head.headers.set("Host", route.authority());
    }
    let chunked = head.headers.has_token("Transfer-Encoding", "chunked");
    if !chunked && !head.headers.contains("Content-Length") && message.body_len() > 0 {
        head.headers.set("Content-Length", message.body_len().to_string());
    }
    Ok(head)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
