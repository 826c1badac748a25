//! One task per inbound connection.
//!
//! The task owns the socket for the connection's whole life: it assembles
//! requests, dispatches them, writes responses strictly in arrival order,
//! and hands the transport to the WebSocket driver when an upgrade is
//! accepted. Nothing else ever touches the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gantry_core::callback::ResponseCallback;
use gantry_core::errors::{Result, TransportError};
use gantry_core::ids::ConnectionId;
use gantry_core::message::{TransportMessage, properties};
use gantry_http1::errors::Http1Error;
use gantry_http1::server::ServerCodec;
use gantry_http1::types::{RequestEvent, RequestHead, ResponseEvent, ResponseHead};
use gantry_websocket::handler::WebSocketHandler;
use gantry_websocket::handshake;
use gantry_websocket::offer::AcceptTerms;
use gantry_websocket::session::WebSocketSession;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::config::ListenerConfig;
use crate::context::TransportContext;
use crate::upgrade::{self, UpgradeRequest, UpgradeStep};
use crate::ws_driver;

const OUTBOUND_QUEUE: usize = 32;

/// A complete inbound message, classified.
enum Inbound {
    Request(TransportMessage),
    Upgrade(TransportMessage),
    Eof,
    IdleExpired,
}

pub(crate) struct InboundSession<S> {
    connection_id: ConnectionId,
    config: ListenerConfig,
    context: TransportContext,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    framed: Framed<S, ServerCodec>,
    request_close: bool,
}

impl<S> InboundSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        io: S,
        connection_id: ConnectionId,
        config: ListenerConfig,
        context: TransportContext,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            connection_id,
            config,
            context,
            local_addr,
            peer_addr,
            framed: Framed::new(io, ServerCodec::new()),
            request_close: false,
        }
    }

    /// Serve the connection to completion, then release whatever it held.
    pub(crate) async fn run(self) -> Result<()> {
        let observer = Arc::clone(self.context.observer());
        let manager = self.context.manager().cloned();
        let connection_id = self.connection_id.clone();
        observer.on_connection_open(&connection_id, self.peer_addr);
        let result = self.drive().await;
        if let Some(manager) = manager {
            manager.release_source(&connection_id);
        }
        observer.on_connection_close(&connection_id);
        result
    }

    async fn drive(mut self) -> Result<()> {
        loop {
            match self.next_message().await? {
                Inbound::Request(message) => {
                    if !self.respond(message).await? {
                        return Ok(());
                    }
                }
                Inbound::Upgrade(message) => match self.negotiate_upgrade(message).await? {
                    Some(session) => self = session,
                    None => return Ok(()),
                },
                Inbound::Eof | Inbound::IdleExpired => return Ok(()),
            }
        }
    }

    /// Assemble the next complete message off the wire.
    async fn next_message(&mut self) -> Result<Inbound> {
        let mut pending: Option<TransportMessage> = None;
        loop {
            let next = match self.config.idle_timeout() {
                Some(window) => match timeout(window, self.framed.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(connection_id = %self.connection_id, "idle timeout, closing");
                        return Ok(Inbound::IdleExpired);
                    }
                },
                None => self.framed.next().await,
            };
            let Some(event) = next else {
                return Ok(Inbound::Eof);
            };
            let event = match event {
                Ok(event) => event,
                Err(error) => {
                    if !matches!(error, Http1Error::Io(_)) {
                        self.refuse(400).await;
                    }
                    return Err(error.into());
                }
            };
            match event {
                RequestEvent::Head(head) => {
                    self.request_close = !head.keep_alive();
                    pending = Some(self.message_from_head(head));
                }
                RequestEvent::Chunk(chunk) => match pending.as_mut() {
                    Some(message) => message.append_chunk(chunk)?,
                    None => {
                        return Err(TransportError::Protocol("body chunk without a head".into()));
                    }
                },
                RequestEvent::End => {
                    let Some(mut message) = pending.take() else {
                        return Err(TransportError::Protocol("end of message without a head".into()));
                    };
                    message.finish_body();
                    let upgrade = handshake::is_upgrade_request(
                        message.method().unwrap_or(""),
                        message.headers(),
                    );
                    return Ok(if upgrade {
                        Inbound::Upgrade(message)
                    } else {
                        Inbound::Request(message)
                    });
                }
            }
        }
    }

    fn message_from_head(&self, head: RequestHead) -> TransportMessage {
        let mut message = TransportMessage::request(head.method, head.target);
        message.set_version(head.version);
        *message.headers_mut() = head.headers;
        let protocol = if self.config.secure { "https" } else { "http" };
        message.set_property(properties::PROTOCOL, protocol);
        message.set_property(properties::LISTENER_ID, self.config.listener_id.as_str());
        message.set_property(properties::LISTENER_PORT, self.local_addr.port());
        message.set_property(properties::CONNECTION_ID, self.connection_id.as_str());
        message.set_property(properties::LOCAL_ADDRESS, self.local_addr.ip().to_string());
        message.set_property(properties::LOCAL_PORT, self.local_addr.port());
        message.set_property(properties::REMOTE_ADDRESS, self.peer_addr.ip().to_string());
        message.set_property(properties::REMOTE_PORT, self.peer_addr.port());
        message.set_property(properties::SECURE, self.config.secure);
        message
    }

    /// Dispatch one request and write its response. Returns whether the
    /// connection may serve another.
    async fn respond(&mut self, message: TransportMessage) -> Result<bool> {
        self.context
            .observer()
            .on_request_received(&self.connection_id, &message);
        let (callback, receiver) = ResponseCallback::channel(self.connection_id.clone());

        let rejection = self.context.validator().and_then(|validator| {
            (!validator.should_continue(&message)).then(|| validator.rejection(&message))
        });
        if let Some(rejection) = rejection {
            debug!(connection_id = %self.connection_id, "request vetoed before dispatch");
            callback.complete(rejection);
        } else {
            let processor = Arc::clone(self.context.processor());
            match processor.receive(message, callback).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(connection_id = %self.connection_id, "processor declined the message");
                    self.refuse(500).await;
                    return Ok(false);
                }
                Err(error) => {
                    warn!(
                        connection_id = %self.connection_id,
                        error = %error,
                        "processor failed"
                    );
                    self.refuse(500).await;
                    return Ok(false);
                }
            }
        }

        // The wait is idle-bounded so a processor that never answers cannot
        // pin the connection open.
        let response = match self.config.idle_timeout() {
            Some(window) => match timeout(window, receiver.recv()).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(connection_id = %self.connection_id, "response wait expired, closing");
                    return Ok(false);
                }
            },
            None => receiver.recv().await,
        };
        let response = match response {
            Ok(response) => response,
            Err(_) => {
                warn!(connection_id = %self.connection_id, "response callback dropped");
                self.refuse(500).await;
                return Ok(false);
            }
        };

        let reusable = self.write_response(&response).await?;
        self.context
            .observer()
            .on_response_sent(&self.connection_id, &response);
        Ok(reusable)
    }

    /// Write a complete response; returns whether the connection may be
    /// reused afterwards.
    async fn write_response(&mut self, response: &TransportMessage) -> Result<bool> {
        let status = response
            .status()
            .ok_or_else(|| TransportError::InvalidMessage("response without a status".into()))?;
        let mut head = ResponseHead::new(status);
        head.version = response.version().to_owned();
        head.headers = response.headers().clone();

        let chunked = head.headers.has_token("Transfer-Encoding", "chunked");
        let bodiless = matches!(status, 100..=199 | 204 | 304);
        if !chunked && !bodiless && !head.headers.contains("Content-Length") {
            head.headers
                .set("Content-Length", response.body_len().to_string());
        }
        if self.request_close {
            head.headers.set("Connection", "close");
        }
        let reusable = head.keep_alive();

        self.framed.feed(ResponseEvent::Head(head)).await?;
        if !bodiless {
            for chunk in response.chunks() {
                if !chunk.is_empty() {
                    self.framed.feed(ResponseEvent::Chunk(chunk.clone())).await?;
                }
            }
        }
        self.framed.send(ResponseEvent::End).await?;
        Ok(reusable)
    }

    /// Best-effort terse close used on protocol and dispatch failures.
    async fn refuse(&mut self, status: u16) {
        let mut head = ResponseHead::new(status);
        head.headers.set("Content-Length", "0");
        head.headers.set("Connection", "close");
        let write = async {
            self.framed.feed(ResponseEvent::Head(head)).await?;
            self.framed.send(ResponseEvent::End).await
        };
        if let Err(error) = write.await {
            debug!(
                connection_id = %self.connection_id,
                error = %error,
                "refusal write failed"
            );
        }
    }

    /// Run the upgrade handshake. `Some(self)` means the upgrade was refused
    /// and the connection keeps serving plain HTTP; `None` means the
    /// connection was consumed, by the WebSocket driver or by teardown.
    async fn negotiate_upgrade(mut self, message: TransportMessage) -> Result<Option<Self>> {
        self.context
            .observer()
            .on_request_received(&self.connection_id, &message);
        let handler = self.context.ws_handler().cloned();
        let request = UpgradeRequest {
            message,
            connection_id: self.connection_id.clone(),
            local_addr: self.local_addr,
            secure: self.config.secure,
            handshake_timeout: self.config.handshake_timeout(),
        };
        match upgrade::negotiate(request, handler.clone()).await {
            UpgradeStep::Reject {
                status,
                version_header,
            } => {
                self.write_upgrade_rejection(status, version_header).await?;
                if self.request_close {
                    return Ok(None);
                }
                Ok(Some(self))
            }
            UpgradeStep::CloseSilently => {
                debug!(connection_id = %self.connection_id, "upgrade undecided, closing");
                Ok(None)
            }
            UpgradeStep::Cancel { code, reason, done } => {
                self.close_with_frame(code, reason).await;
                let _ = done.send(());
                Ok(None)
            }
            UpgradeStep::Accept {
                terms,
                reply,
                key,
                offered,
                url,
            } => {
                // negotiate never accepts without a handler
                let Some(handler) = handler else {
                    return Ok(None);
                };
                self.complete_upgrade(handler, terms, reply, &key, &offered, url)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Refuse an upgrade but keep the connection usable as plain HTTP.
    async fn write_upgrade_rejection(&mut self, status: u16, advertise_version: bool) -> Result<()> {
        let mut head = ResponseHead::new(status);
        head.headers.set("Content-Length", "0");
        if advertise_version {
            head.headers
                .set("Sec-WebSocket-Version", handshake::WEBSOCKET_VERSION);
        }
        if self.request_close {
            head.headers.set("Connection", "close");
        }
        self.framed.feed(ResponseEvent::Head(head)).await?;
        self.framed.send(ResponseEvent::End).await?;
        Ok(())
    }

    /// Write the `101`, swap the socket to frame transport, and drive the
    /// session until it ends.
    async fn complete_upgrade(
        mut self,
        handler: Arc<dyn WebSocketHandler>,
        terms: AcceptTerms,
        reply: oneshot::Sender<Result<WebSocketSession>>,
        key: &str,
        offered: &[String],
        url: String,
    ) -> Result<()> {
        let subprotocol = match handshake::select_subprotocol(offered, &terms.subprotocols) {
            Ok(subprotocol) => subprotocol,
            Err(error) => {
                let _ = reply.send(Err(TransportError::Handshake(error.to_string())));
                self.close_with_frame(1002, "subprotocol negotiation failed".to_owned())
                    .await;
                return Err(error);
            }
        };

        let mut head = ResponseHead::new(101);
        head.headers.set("Upgrade", "websocket");
        head.headers.set("Connection", "Upgrade");
        head.headers
            .set("Sec-WebSocket-Accept", handshake::accept_key(key));
        if let Some(ref subprotocol) = subprotocol {
            head.headers
                .set("Sec-WebSocket-Protocol", subprotocol.as_str());
        }
        let write = async {
            self.framed.feed(ResponseEvent::Head(head)).await?;
            self.framed.send(ResponseEvent::End).await
        };
        if let Err(error) = write.await {
            let _ = reply.send(Err(TransportError::Handshake(
                "connection closed during the handshake".into(),
            )));
            return Err(error.into());
        }

        // Bytes already read past the head replay into the frame layer, so a
        // client that speaks immediately after its request loses nothing.
        let parts = self.framed.into_parts();
        let ws = WebSocketStream::from_partially_read(
            parts.io,
            parts.read_buf.to_vec(),
            Role::Server,
            None,
        )
        .await;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let session = WebSocketSession::new(
            self.connection_id.clone(),
            url,
            subprotocol,
            outbound_tx,
        );
        let _ = reply.send(Ok(session.clone()));
        debug!(
            connection_id = %self.connection_id,
            url = %session.url(),
            "connection upgraded"
        );

        let idle = (terms.idle_timeout > Duration::ZERO).then_some(terms.idle_timeout);
        ws_driver::run(ws, outbound_rx, session, handler, idle).await
    }

    /// Refusal after the peer committed to the upgrade: a bare close frame,
    /// then shutdown.
    async fn close_with_frame(self, code: u16, reason: String) {
        let parts = self.framed.into_parts();
        let mut ws = WebSocketStream::from_raw_socket(parts.io, Role::Server, None).await;
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.into(),
        };
        if let Err(error) = ws.send(Message::Close(Some(frame))).await {
            debug!(
                connection_id = %self.connection_id,
                error = %error,
                "close frame write failed"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::{Bytes, BytesMut};
    use gantry_core::observer::TransportObserver;
    use gantry_core::processor::{MessageProcessor, RequestValidator};
    use gantry_http1::client::ClientCodec;
    use gantry_websocket::message::WsMessage;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    struct Echo;

    #[async_trait]
    impl MessageProcessor for Echo {
        async fn receive(
            &self,
            message: TransportMessage,
            callback: ResponseCallback,
        ) -> Result<bool> {
            let mut response = TransportMessage::response(200).with_body(message.body_bytes());
            response
                .headers_mut()
                .set("X-Target", message.target().unwrap_or(""));
            callback.complete(response);
            Ok(true)
        }
    }

    fn boot(
        context: TransportContext,
        config: ListenerConfig,
    ) -> (DuplexStream, JoinHandle<Result<()>>) {
        let (client, server) = tokio::io::duplex(8192);
        let session = InboundSession::new(
            server,
            ConnectionId::new(),
            config,
            context,
            "127.0.0.1:8490".parse().unwrap(),
            "127.0.0.1:50000".parse().unwrap(),
        );
        (client, tokio::spawn(session.run()))
    }

    fn boot_echo() -> (Framed<DuplexStream, ClientCodec>, JoinHandle<Result<()>>) {
        let (client, task) = boot(
            TransportContext::new(Arc::new(Echo)),
            ListenerConfig::default(),
        );
        (Framed::new(client, ClientCodec::new()), task)
    }

    async fn send_request(
        client: &mut Framed<DuplexStream, ClientCodec>,
        head: RequestHead,
        body: &[u8],
    ) {
        client.feed(RequestEvent::Head(head)).await.unwrap();
        if !body.is_empty() {
            client
                .feed(RequestEvent::Chunk(Bytes::copy_from_slice(body)))
                .await
                .unwrap();
        }
        client.send(RequestEvent::End).await.unwrap();
    }

    async fn read_response(
        client: &mut Framed<DuplexStream, ClientCodec>,
    ) -> (ResponseHead, Bytes) {
        let mut head = None;
        let mut body = BytesMut::new();
        while let Some(event) = client.next().await {
            match event.unwrap() {
                ResponseEvent::Head(h) => head = Some(h),
                ResponseEvent::Chunk(chunk) => body.extend_from_slice(&chunk),
                ResponseEvent::End => break,
            }
        }
        (head.expect("response head"), body.freeze())
    }

    fn get(target: &str) -> RequestHead {
        let mut head = RequestHead::new("GET", target);
        head.headers.set("Host", "localhost:8490");
        head
    }

    #[tokio::test]
    async fn dispatches_and_responds() {
        let (mut client, _task) = boot_echo();
        let mut head = RequestHead::new("POST", "/upload");
        head.headers.set("Host", "localhost:8490");
        head.headers.set("Content-Length", "5");
        send_request(&mut client, head, b"hello").await;

        let (head, body) = read_response(&mut client).await;
        assert_eq!(head.status, 200);
        assert_eq!(head.headers.get("X-Target"), Some("/upload"));
        assert_eq!(head.headers.get("Content-Length"), Some("5"));
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn stamps_connection_properties() {
        struct Capture {
            seen: Arc<StdMutex<Option<TransportMessage>>>,
        }

        #[async_trait]
        impl MessageProcessor for Capture {
            async fn receive(
                &self,
                message: TransportMessage,
                callback: ResponseCallback,
            ) -> Result<bool> {
                *self.seen.lock().unwrap() = Some(message);
                callback.complete(TransportMessage::response(204));
                Ok(true)
            }
        }

        let seen = Arc::new(StdMutex::new(None));
        let (client, _task) = boot(
            TransportContext::new(Arc::new(Capture {
                seen: Arc::clone(&seen),
            })),
            ListenerConfig::default(),
        );
        let mut client = Framed::new(client, ClientCodec::new());
        send_request(&mut client, get("/props"), b"").await;
        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.status, 204);

        let message = seen.lock().unwrap().take().unwrap();
        assert_eq!(message.property_str(properties::PROTOCOL), Some("http"));
        assert_eq!(message.property_str(properties::LISTENER_ID), Some("default"));
        assert_eq!(message.property_u64(properties::LISTENER_PORT), Some(8490));
        assert_eq!(
            message.property_str(properties::REMOTE_ADDRESS),
            Some("127.0.0.1")
        );
        assert_eq!(message.property_u64(properties::REMOTE_PORT), Some(50000));
        assert_eq!(message.property_bool(properties::SECURE), Some(false));
        assert!(message.property_str(properties::CONNECTION_ID).is_some());
    }

    #[tokio::test]
    async fn validator_veto_short_circuits() {
        struct DenyAll;

        impl RequestValidator for DenyAll {
            fn should_continue(&self, _message: &TransportMessage) -> bool {
                false
            }
        }

        struct MustNotRun {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl MessageProcessor for MustNotRun {
            async fn receive(
                &self,
                _message: TransportMessage,
                callback: ResponseCallback,
            ) -> Result<bool> {
                let _ = self.calls.fetch_add(1, Ordering::SeqCst);
                callback.complete(TransportMessage::response(200));
                Ok(true)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let context = TransportContext::new(Arc::new(MustNotRun {
            calls: Arc::clone(&calls),
        }))
        .with_validator(Arc::new(DenyAll));
        let (client, _task) = boot(context, ListenerConfig::default());
        let mut client = Framed::new(client, ClientCodec::new());

        send_request(&mut client, get("/blocked"), b"").await;
        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.status, 403);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // The veto answered the request; the connection is still serviceable.
        send_request(&mut client, get("/still-blocked"), b"").await;
        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.status, 403);
    }

    #[tokio::test]
    async fn processor_decline_terminates_with_500() {
        struct Decline;

        #[async_trait]
        impl MessageProcessor for Decline {
            async fn receive(
                &self,
                _message: TransportMessage,
                _callback: ResponseCallback,
            ) -> Result<bool> {
                Ok(false)
            }
        }

        let (client, task) = boot(
            TransportContext::new(Arc::new(Decline)),
            ListenerConfig::default(),
        );
        let mut client = Framed::new(client, ClientCodec::new());
        send_request(&mut client, get("/"), b"").await;
        let (head, body) = read_response(&mut client).await;
        assert_eq!(head.status, 500);
        assert!(body.is_empty());
        assert!(head.headers.has_token("Connection", "close"));
        assert!(client.next().await.is_none());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropped_callback_terminates_with_500() {
        struct Dropper;

        #[async_trait]
        impl MessageProcessor for Dropper {
            async fn receive(
                &self,
                _message: TransportMessage,
                callback: ResponseCallback,
            ) -> Result<bool> {
                drop(callback);
                Ok(true)
            }
        }

        let (client, task) = boot(
            TransportContext::new(Arc::new(Dropper)),
            ListenerConfig::default(),
        );
        let mut client = Framed::new(client, ClientCodec::new());
        send_request(&mut client, get("/"), b"").await;
        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.status, 500);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn keep_alive_serves_requests_in_order() {
        let (mut client, task) = boot_echo();
        for target in ["/one", "/two", "/three"] {
            send_request(&mut client, get(target), b"").await;
            let (head, _) = read_response(&mut client).await;
            assert_eq!(head.status, 200);
            assert_eq!(head.headers.get("X-Target"), Some(target));
        }
        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_arrival_order() {
        let (mut client, _task) = boot_echo();
        let mut first = get("/first");
        first.headers.set("Content-Length", "0");
        send_request(&mut client, first, b"").await;
        send_request(&mut client, get("/second"), b"").await;

        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.headers.get("X-Target"), Some("/first"));
        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.headers.get("X-Target"), Some("/second"));
    }

    #[tokio::test]
    async fn connection_close_is_honored() {
        let (mut client, task) = boot_echo();
        let mut head = get("/bye");
        head.headers.set("Connection", "close");
        send_request(&mut client, head, b"").await;

        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.status, 200);
        assert!(head.headers.has_token("Connection", "close"));
        assert!(client.next().await.is_none());
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn chunked_request_body_is_reassembled() {
        let (mut client, _task) = boot_echo();
        let mut head = RequestHead::new("POST", "/chunks");
        head.headers.set("Host", "localhost:8490");
        head.headers.set("Transfer-Encoding", "chunked");
        client.feed(RequestEvent::Head(head)).await.unwrap();
        client
            .feed(RequestEvent::Chunk(Bytes::from_static(b"ab")))
            .await
            .unwrap();
        client
            .feed(RequestEvent::Chunk(Bytes::from_static(b"cd")))
            .await
            .unwrap();
        client.send(RequestEvent::End).await.unwrap();

        let (head, body) = read_response(&mut client).await;
        assert_eq!(head.status, 200);
        assert_eq!(body, Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn non_websocket_upgrade_goes_to_the_processor() {
        let (mut client, _task) = boot_echo();
        let mut head = get("/h2");
        head.headers.set("Connection", "Upgrade");
        head.headers.set("Upgrade", "h2c");
        send_request(&mut client, head, b"").await;

        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.status, 200);
        assert_eq!(head.headers.get("X-Target"), Some("/h2"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let (mut client, task) = boot(
            TransportContext::new(Arc::new(Echo)),
            ListenerConfig::default(),
        );
        client.write_all(b"not a request\r\n\r\n").await.unwrap();
        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_closed_quietly() {
        let config = ListenerConfig {
            idle_timeout_secs: 5,
            ..ListenerConfig::default()
        };
        let (mut client, task) = boot(TransportContext::new(Arc::new(Echo)), config);
        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn response_wait_is_idle_bounded() {
        struct Park {
            stash: Arc<StdMutex<Option<ResponseCallback>>>,
        }

        #[async_trait]
        impl MessageProcessor for Park {
            async fn receive(
                &self,
                _message: TransportMessage,
                callback: ResponseCallback,
            ) -> Result<bool> {
                *self.stash.lock().unwrap() = Some(callback);
                Ok(true)
            }
        }

        let stash = Arc::new(StdMutex::new(None));
        let config = ListenerConfig {
            idle_timeout_secs: 1,
            ..ListenerConfig::default()
        };
        let (mut client, task) = boot(
            TransportContext::new(Arc::new(Park {
                stash: Arc::clone(&stash),
            })),
            config,
        );
        client
            .write_all(b"GET /slow HTTP/1.1\r\nHost: localhost:8490\r\n\r\n")
            .await
            .unwrap();
        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
        task.await.unwrap().unwrap();
        assert!(stash.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn observer_sees_the_request_lifecycle() {
        #[derive(Default)]
        struct Counts {
            opened: AtomicUsize,
            closed: AtomicUsize,
            requests: AtomicUsize,
            responses: AtomicUsize,
        }

        impl TransportObserver for Counts {
            fn on_connection_open(&self, _id: &ConnectionId, _remote: SocketAddr) {
                let _ = self.opened.fetch_add(1, Ordering::SeqCst);
            }
            fn on_connection_close(&self, _id: &ConnectionId) {
                let _ = self.closed.fetch_add(1, Ordering::SeqCst);
            }
            fn on_request_received(&self, _id: &ConnectionId, _message: &TransportMessage) {
                let _ = self.requests.fetch_add(1, Ordering::SeqCst);
            }
            fn on_response_sent(&self, _id: &ConnectionId, _message: &TransportMessage) {
                let _ = self.responses.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counts = Arc::new(Counts::default());
        let context = TransportContext::new(Arc::new(Echo))
            .with_observer(Arc::clone(&counts) as Arc<dyn TransportObserver>);
        let (client, task) = boot(context, ListenerConfig::default());
        let mut client = Framed::new(client, ClientCodec::new());
        send_request(&mut client, get("/observed"), b"").await;
        let (head, _) = read_response(&mut client).await;
        assert_eq!(head.status, 200);
        drop(client);
        task.await.unwrap().unwrap();

        assert_eq!(counts.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counts.requests.load(Ordering::SeqCst), 1);
        assert_eq!(counts.responses.load(Ordering::SeqCst), 1);
        assert_eq!(counts.closed.load(Ordering::SeqCst), 1);
    }

    // upgrade paths

    const UPGRADE_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
Host: localhost:8490\r\n\
Connection: Upgrade\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";

    async fn read_head_raw(io: &mut DuplexStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            let _ = io.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
        }
        String::from_utf8(buf).unwrap()
    }

    struct AcceptEcho;

    #[async_trait]
    impl WebSocketHandler for AcceptEcho {
        async fn on_message(&self, message: WsMessage) -> Result<()> {
            match message {
                WsMessage::Init(offer) => {
                    let _ = offer.accept(Vec::new(), false, Duration::ZERO).await;
                }
                WsMessage::Text(text) => {
                    if let Some(session) = text.session().upgrade() {
                        session.send_text(text.text()).await?;
                    }
                }
                _ => {}
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn upgrade_completes_and_frames_flow() {
        let context = TransportContext::new(Arc::new(Echo))
            .with_websocket_handler(Arc::new(AcceptEcho));
        let (mut client, task) = boot(context, ListenerConfig::default());

        client.write_all(UPGRADE_REQUEST).await.unwrap();
        let head = read_head_raw(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Upgrade: websocket\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        let mut ws = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        ws.send(Message::text("ping")).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::text("ping"));

        ws.send(Message::Close(None)).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn upgrade_url_reflects_the_request_and_echo_round_trips() {
        struct AcceptStash {
            url: Arc<StdMutex<Option<String>>>,
        }

        #[async_trait]
        impl WebSocketHandler for AcceptStash {
            async fn on_message(&self, message: WsMessage) -> Result<()> {
                match message {
                    WsMessage::Init(offer) => {
                        *self.url.lock().unwrap() = Some(offer.url().to_owned());
                        let _ = offer.accept(Vec::new(), false, Duration::ZERO).await;
                    }
                    WsMessage::Text(text) => {
                        if let Some(session) = text.session().upgrade() {
                            session.send_text(text.text()).await?;
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
        }

        let url = Arc::new(StdMutex::new(None));
        let context = TransportContext::new(Arc::new(Echo)).with_websocket_handler(Arc::new(
            AcceptStash {
                url: Arc::clone(&url),
            },
        ));
        let (mut client, task) = boot(context, ListenerConfig::default());

        let request = b"GET /test HTTP/1.1\r\n\
Host: localhost:8490\r\n\
Connection: Upgrade\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";
        client.write_all(request).await.unwrap();
        let head = read_head_raw(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101"));
        assert_eq!(
            url.lock().unwrap().as_deref(),
            Some("ws://localhost:8490/test")
        );

        let mut ws = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        ws.send(Message::text("test")).await.unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::text("test"));

        ws.send(Message::Close(None)).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn subprotocol_is_negotiated_from_the_client_offer() {
        struct AcceptXml {
            stash: Arc<StdMutex<Option<WebSocketSession>>>,
        }

        #[async_trait]
        impl WebSocketHandler for AcceptXml {
            async fn on_message(&self, message: WsMessage) -> Result<()> {
                if let WsMessage::Init(offer) = message {
                    let session = offer
                        .accept(vec!["xml".to_owned()], false, Duration::ZERO)
                        .await?;
                    *self.stash.lock().unwrap() = Some(session);
                }
                Ok(())
            }
        }

        let stash = Arc::new(StdMutex::new(None));
        let context = TransportContext::new(Arc::new(Echo)).with_websocket_handler(Arc::new(
            AcceptXml {
                stash: Arc::clone(&stash),
            },
        ));
        let (mut client, _task) = boot(context, ListenerConfig::default());

        let request = b"GET /chat HTTP/1.1\r\n\
Host: localhost:8490\r\n\
Connection: Upgrade\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
Sec-WebSocket-Protocol: json, xml\r\n\r\n";
        client.write_all(request).await.unwrap();
        let head = read_head_raw(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 101"));
        assert!(head.contains("Sec-WebSocket-Protocol: xml\r\n"));
        let session = stash.lock().unwrap().take().unwrap();
        assert_eq!(session.subprotocol(), Some("xml"));
    }

    #[tokio::test]
    async fn no_subprotocol_overlap_fails_the_handshake() {
        struct AcceptJson;

        #[async_trait]
        impl WebSocketHandler for AcceptJson {
            async fn on_message(&self, message: WsMessage) -> Result<()> {
                if let WsMessage::Init(offer) = message {
                    let result = offer
                        .accept(vec!["json".to_owned()], false, Duration::ZERO)
                        .await;
                    assert!(matches!(result, Err(TransportError::Handshake(_))));
                }
                Ok(())
            }
        }

        let context =
            TransportContext::new(Arc::new(Echo)).with_websocket_handler(Arc::new(AcceptJson));
        let (mut client, task) = boot(context, ListenerConfig::default());

        let request = b"GET /chat HTTP/1.1\r\n\
Host: localhost:8490\r\n\
Connection: Upgrade\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\
Sec-WebSocket-Protocol: xml\r\n\r\n";
        client.write_all(request).await.unwrap();
        let mut reply = Vec::new();
        let _ = client.read_to_end(&mut reply).await.unwrap();
        // A close frame, not an HTTP response.
        assert!(!reply.is_empty());
        assert!(!reply.starts_with(b"HTTP/1.1"));
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn canceled_upgrade_sends_a_close_frame() {
        struct CancelPolicy;

        #[async_trait]
        impl WebSocketHandler for CancelPolicy {
            async fn on_message(&self, message: WsMessage) -> Result<()> {
                if let WsMessage::Init(offer) = message {
                    offer.cancel(1008, "policy violation").await;
                }
                Ok(())
            }
        }

        let context =
            TransportContext::new(Arc::new(Echo)).with_websocket_handler(Arc::new(CancelPolicy));
        let (mut client, task) = boot(context, ListenerConfig::default());

        client.write_all(UPGRADE_REQUEST).await.unwrap();
        let mut ws = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let frame = ws.next().await.unwrap().unwrap();
        match frame {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason.as_str(), "policy violation");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropped_offer_leaves_plain_http_usable() {
        struct DropOffer;

        #[async_trait]
        impl WebSocketHandler for DropOffer {
            async fn on_message(&self, _message: WsMessage) -> Result<()> {
                Ok(())
            }
        }

        let context =
            TransportContext::new(Arc::new(Echo)).with_websocket_handler(Arc::new(DropOffer));
        let (mut client, _task) = boot(context, ListenerConfig::default());

        client.write_all(UPGRADE_REQUEST).await.unwrap();
        let head = read_head_raw(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 400"));

        // Plain HTTP still works on the same connection.
        client
            .write_all(b"GET /after HTTP/1.1\r\nHost: localhost:8490\r\n\r\n")
            .await
            .unwrap();
        let head = read_head_raw(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 200"));
        assert!(head.contains("X-Target: /after\r\n"));
    }

    #[tokio::test]
    async fn wrong_version_gets_426_with_advertisement() {
        let context =
            TransportContext::new(Arc::new(Echo)).with_websocket_handler(Arc::new(AcceptEcho));
        let (mut client, _task) = boot(context, ListenerConfig::default());

        let request = b"GET /chat HTTP/1.1\r\n\
Host: localhost:8490\r\n\
Connection: Upgrade\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 8\r\n\r\n";
        client.write_all(request).await.unwrap();
        let head = read_head_raw(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(head.contains("Sec-WebSocket-Version: 13\r\n"));
    }

    #[tokio::test]
    async fn upgrade_without_a_handler_is_rejected() {
        let (mut client, _task) = boot(
            TransportContext::new(Arc::new(Echo)),
            ListenerConfig::default(),
        );
        client.write_all(UPGRADE_REQUEST).await.unwrap();
        let head = read_head_raw(&mut client).await;
        assert!(head.starts_with("HTTP/1.1 400"));
    }
}
