//! The post-upgrade frame loop.
//!
//! One driver per upgraded connection. Inbound frames become handler
//! messages, queued session sends become outbound frames, and an optional
//! idle timer surfaces inactivity without closing anything itself.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gantry_core::errors::{Result, TransportError};
use gantry_websocket::handler::WebSocketHandler;
use gantry_websocket::message::{
    BinaryMessage, CloseMessage, ControlMessage, TextMessage, WsMessage,
};
use gantry_websocket::session::{OutboundFrame, WebSocketSession};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, warn};

fn wire_error(error: tokio_tungstenite::tungstenite::Error) -> TransportError {
    match error {
        tokio_tungstenite::tungstenite::Error::Io(io) => TransportError::Io(io),
        other => TransportError::Protocol(other.to_string()),
    }
}

/// Hand one message to the handler. A handler error ends the connection.
async fn deliver(
    handler: &dyn WebSocketHandler,
    session: &WebSocketSession,
    message: WsMessage,
) -> bool {
    match handler.on_message(message).await {
        Ok(()) => true,
        Err(error) => {
            warn!(
                connection_id = %session.connection_id(),
                error = %error,
                "websocket handler failed"
            );
            false
        }
    }
}

/// Drive an upgraded connection until either side closes it.
///
/// The protocol layer answers pings itself; the handler sees them as
/// [`ControlMessage`]s after the fact. Each inbound frame re-arms the idle
/// timer, as does the timer firing, so a connection that stays quiet keeps
/// producing idle notices rather than one.
pub(crate) async fn run<S>(
    mut ws: WebSocketStream<S>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    session: WebSocketSession,
    handler: Arc<dyn WebSocketHandler>,
    idle: Option<Duration>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut last_activity = Instant::now();
    loop {
        let idle_deadline = async {
            match idle {
                Some(window) => sleep_until(last_activity + window).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            frame = ws.next() => {
                let Some(frame) = frame else { break };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(error) => {
                        debug!(
                            connection_id = %session.connection_id(),
                            error = %error,
                            "websocket read failed"
                        );
                        break;
                    }
                };
                last_activity = Instant::now();
                match frame {
                    Message::Text(text) => {
                        let message = WsMessage::Text(TextMessage::new(
                            session.downgrade(),
                            text.as_str(),
                            true,
                        ));
                        if !deliver(handler.as_ref(), &session, message).await {
                            break;
                        }
                    }
                    Message::Binary(payload) => {
                        let message = WsMessage::Binary(BinaryMessage::new(
                            session.downgrade(),
                            payload,
                            true,
                        ));
                        if !deliver(handler.as_ref(), &session, message).await {
                            break;
                        }
                    }
                    Message::Ping(payload) => {
                        let message = WsMessage::Control(ControlMessage::ping(
                            session.downgrade(),
                            payload,
                        ));
                        if !deliver(handler.as_ref(), &session, message).await {
                            break;
                        }
                    }
                    Message::Pong(payload) => {
                        let message = WsMessage::Control(ControlMessage::pong(
                            session.downgrade(),
                            payload,
                        ));
                        if !deliver(handler.as_ref(), &session, message).await {
                            break;
                        }
                    }
                    Message::Close(frame) => {
                        let (code, reason) = match frame {
                            Some(frame) => {
                                (Some(u16::from(frame.code)), frame.reason.as_str().to_owned())
                            }
                            None => (None, String::new()),
                        };
                        session.mark_closed();
                        let message = WsMessage::Close(CloseMessage::new(
                            session.downgrade(),
                            code,
                            reason,
                        ));
                        let _ = deliver(handler.as_ref(), &session, message).await;
                        break;
                    }
                    Message::Frame(_) => {}
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                match frame {
                    OutboundFrame::Text(text) => {
                        ws.send(Message::text(text)).await.map_err(wire_error)?;
                    }
                    OutboundFrame::Binary(payload) => {
                        ws.send(Message::binary(payload)).await.map_err(wire_error)?;
                    }
                    OutboundFrame::Close { code, reason } => {
                        // Close-after-write: the frame goes out and the
                        // connection ends without waiting for the peer's echo.
                        let frame = CloseFrame {
                            code: code.into(),
                            reason: reason.into(),
                        };
                        if let Err(error) = ws.send(Message::Close(Some(frame))).await {
                            debug!(
                                connection_id = %session.connection_id(),
                                error = %error,
                                "close frame write failed"
                            );
                        }
                        break;
                    }
                }
            }
            () = idle_deadline => {
                last_activity = Instant::now();
                let notice =
                    WsMessage::Control(ControlMessage::idle_timeout(session.downgrade()));
                if !deliver(handler.as_ref(), &session, notice).await {
                    break;
                }
            }
        }
    }
    session.mark_closed();
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_core::ids::ConnectionId;
    use gantry_websocket::message::ControlSignal;
    use tokio::io::DuplexStream;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// Forwards every message to the test body.
    struct Forward {
        tx: mpsc::Sender<WsMessage>,
    }

    #[async_trait]
    impl WebSocketHandler for Forward {
        async fn on_message(&self, message: WsMessage) -> Result<()> {
            self.tx
                .send(message)
                .await
                .map_err(|_| TransportError::ConnectionClosed)
        }
    }

    /// Echoes text frames back through the session.
    struct Echo;

    #[async_trait]
    impl WebSocketHandler for Echo {
        async fn on_message(&self, message: WsMessage) -> Result<()> {
            if let WsMessage::Text(text) = message {
                if let Some(session) = text.session().upgrade() {
                    session.send_text(text.text()).await?;
                }
            }
            Ok(())
        }
    }

    async fn boot_driver(
        handler: Arc<dyn WebSocketHandler>,
        idle: Option<Duration>,
    ) -> (
        WebSocketStream<DuplexStream>,
        WebSocketSession,
        JoinHandle<Result<()>>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let (tx, rx) = mpsc::channel(8);
        let session = WebSocketSession::new(
            ConnectionId::new(),
            "ws://localhost:8490/test",
            None,
            tx,
        );
        let driver = tokio::spawn(run(server, rx, session.clone(), handler, idle));
        (client, session, driver)
    }

    #[tokio::test]
    async fn echoes_text_through_the_session() {
        let (mut client, _session, driver) = boot_driver(Arc::new(Echo), None).await;

        client.send(Message::text("hello")).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::text("hello"));

        client.send(Message::Close(None)).await.unwrap();
        driver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn client_close_ends_the_driver() {
        let (forward_tx, mut seen) = mpsc::channel(8);
        let (mut client, session, driver) =
            boot_driver(Arc::new(Forward { tx: forward_tx }), None).await;

        client
            .send(Message::Close(Some(CloseFrame {
                code: 1001.into(),
                reason: "going away".into(),
            })))
            .await
            .unwrap();

        let message = seen.recv().await.unwrap();
        match message {
            WsMessage::Close(close) => {
                assert_eq!(close.code(), Some(1001));
                assert_eq!(close.reason(), "going away");
            }
            other => panic!("expected close, got {other:?}"),
        }
        driver.await.unwrap().unwrap();
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn session_close_writes_a_close_frame() {
        let (forward_tx, _seen) = mpsc::channel(8);
        let (mut client, session, driver) =
            boot_driver(Arc::new(Forward { tx: forward_tx }), None).await;

        session.close(1000, "done").await.unwrap();

        let frame = client.next().await.unwrap().unwrap();
        match frame {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1000);
                assert_eq!(frame.reason.as_str(), "done");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        driver.await.unwrap().unwrap();
        assert!(!session.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_fires_and_rearms() {
        let (forward_tx, mut seen) = mpsc::channel(8);
        let (mut client, _session, driver) = boot_driver(
            Arc::new(Forward { tx: forward_tx }),
            Some(Duration::from_secs(5)),
        )
        .await;

        for _ in 0..2 {
            let message = seen.recv().await.unwrap();
            match message {
                WsMessage::Control(control) => assert!(control.is_idle_timeout()),
                other => panic!("expected idle notice, got {other:?}"),
            }
        }

        client.send(Message::Close(None)).await.unwrap();
        driver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn ping_reaches_handler_and_pong_goes_back() {
        let (forward_tx, mut seen) = mpsc::channel(8);
        let (mut client, _session, driver) =
            boot_driver(Arc::new(Forward { tx: forward_tx }), None).await;

        client
            .send(Message::Ping(bytes::Bytes::from_static(b"hb")))
            .await
            .unwrap();

        let message = seen.recv().await.unwrap();
        match message {
            WsMessage::Control(control) => {
                assert!(matches!(control.signal(), ControlSignal::Ping(_)));
                assert_eq!(control.payload(), b"hb");
            }
            other => panic!("expected ping, got {other:?}"),
        }
        // The protocol layer answers without handler involvement.
        let pong = client.next().await.unwrap().unwrap();
        assert_eq!(pong, Message::Pong(bytes::Bytes::from_static(b"hb")));

        client.send(Message::Close(None)).await.unwrap();
        driver.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handler_error_ends_the_driver() {
        struct Failing;

        #[async_trait]
        impl WebSocketHandler for Failing {
            async fn on_message(&self, _message: WsMessage) -> Result<()> {
                Err(TransportError::Processor("boom".into()))
            }
        }

        let (mut client, session, driver) = boot_driver(Arc::new(Failing), None).await;
        client.send(Message::text("hi")).await.unwrap();
        driver.await.unwrap().unwrap();
        assert!(!session.is_open());
    }
}
