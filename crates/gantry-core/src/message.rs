//! The transport-neutral message envelope.
//!
//! A [`TransportMessage`] carries one request or response between wire
//! handling and application logic. The body is an ordered sequence of byte
//! chunks closed by an explicit end-of-message marker; a message must not be
//! dispatched to a processor until [`TransportMessage::body_complete`] is
//! true. Connection metadata travels in the property bag under the keys in
//! [`properties`].

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use serde_json::Value;

use crate::errors::{Result, TransportError};
use crate::headers::Headers;

/// Well-known property-bag keys.
pub mod properties {
    /// Wire protocol of the inbound connection (`"http"` or `"https"`).
    pub const PROTOCOL: &str = "protocol";
    /// Identity of the listener interface that accepted the connection.
    pub const LISTENER_ID: &str = "listener_id";
    /// Port the listener is bound to.
    pub const LISTENER_PORT: &str = "listener_port";
    /// ID of the inbound connection the message arrived on.
    pub const CONNECTION_ID: &str = "connection_id";
    /// Local (listener-side) IP address of the connection.
    pub const LOCAL_ADDRESS: &str = "local_address";
    /// Local port of the connection.
    pub const LOCAL_PORT: &str = "local_port";
    /// Remote peer IP address.
    pub const REMOTE_ADDRESS: &str = "remote_address";
    /// Remote peer port.
    pub const REMOTE_PORT: &str = "remote_port";
    /// Whether the connection carries a negotiated security context.
    pub const SECURE: &str = "secure";
    /// Destination host for outbound sends.
    pub const HOST: &str = "host";
    /// Destination port for outbound sends.
    pub const PORT: &str = "port";
}

/// Neutral envelope for one request/response unit.
#[derive(Clone, Debug, Default)]
pub struct TransportMessage {
    method: Option<String>,
    target: Option<String>,
    version: String,
    status: Option<u16>,
    headers: Headers,
    chunks: Vec<Bytes>,
    body_complete: bool,
    properties: HashMap<String, Value>,
}

impl TransportMessage {
    /// Create a request message with an empty, unfinished body.
    #[must_use]
    pub fn request(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            target: Some(target.into()),
            version: "HTTP/1.1".to_owned(),
            ..Self::default()
        }
    }

    /// Create a response message with an empty, unfinished body.
    #[must_use]
    pub fn response(status: u16) -> Self {
        Self {
            status: Some(status),
            version: "HTTP/1.1".to_owned(),
            ..Self::default()
        }
    }

    /// Set the full body in one shot and mark it complete.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.chunks = vec![body.into()];
        self.body_complete = true;
        self
    }

    /// Request method, if this is a request.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Request target URI, if this is a request.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Protocol version string, e.g. `"HTTP/1.1"`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Override the protocol version string.
    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    /// Response status code, if this is a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Header map.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable header map.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Append a body chunk.
    ///
    /// Fails once the end-of-message marker has been set.
    pub fn append_chunk(&mut self, chunk: Bytes) -> Result<()> {
        if self.body_complete {
            return Err(TransportError::InvalidMessage(
                "body chunk appended after end of message".into(),
            ));
        }
        self.chunks.push(chunk);
        Ok(())
    }

    /// Set the end-of-message marker. Idempotent.
    pub fn finish_body(&mut self) {
        self.body_complete = true;
    }

    /// Whether the end-of-message marker has been set.
    #[must_use]
    pub fn body_complete(&self) -> bool {
        self.body_complete
    }

    /// Body chunks in arrival order.
    #[must_use]
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Total body length in bytes.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Concatenated body. Cheap for the common zero/one-chunk case.
    #[must_use]
    pub fn body_bytes(&self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks[0].clone(),
            _ => {
                let mut buf = BytesMut::with_capacity(self.body_len());
                for chunk in &self.chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }

    /// Set a property-bag entry.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let _ = self.properties.insert(key.into(), value.into());
    }

    /// Raw property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Property value as a string slice.
    #[must_use]
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Property value as an unsigned integer.
    #[must_use]
    pub fn property_u64(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(Value::as_u64)
    }

    /// Property value as a boolean.
    #[must_use]
    pub fn property_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_constructor() {
        let msg = TransportMessage::request("GET", "/test");
        assert_eq!(msg.method(), Some("GET"));
        assert_eq!(msg.target(), Some("/test"));
        assert_eq!(msg.version(), "HTTP/1.1");
        assert_eq!(msg.status(), None);
        assert!(!msg.body_complete());
    }

    #[test]
    fn response_constructor() {
        let msg = TransportMessage::response(200);
        assert_eq!(msg.status(), Some(200));
        assert_eq!(msg.method(), None);
        assert!(!msg.body_complete());
    }

    #[test]
    fn body_preserves_chunk_order() {
        let mut msg = TransportMessage::request("POST", "/upload");
        msg.append_chunk(Bytes::from_static(b"alpha ")).unwrap();
        msg.append_chunk(Bytes::from_static(b"beta ")).unwrap();
        msg.append_chunk(Bytes::from_static(b"gamma")).unwrap();
        msg.finish_body();
        assert_eq!(msg.body_bytes(), Bytes::from_static(b"alpha beta gamma"));
        assert_eq!(msg.body_len(), 16);
        assert_eq!(msg.chunks().len(), 3);
    }

    #[test]
    fn append_after_finish_fails() {
        let mut msg = TransportMessage::request("POST", "/upload");
        msg.append_chunk(Bytes::from_static(b"x")).unwrap();
        msg.finish_body();
        let err = msg.append_chunk(Bytes::from_static(b"y")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidMessage(_)));
        assert_eq!(msg.body_bytes(), Bytes::from_static(b"x"));
    }

    #[test]
    fn finish_is_idempotent() {
        let mut msg = TransportMessage::request("GET", "/");
        msg.finish_body();
        msg.finish_body();
        assert!(msg.body_complete());
    }

    #[test]
    fn with_body_completes() {
        let msg = TransportMessage::response(200).with_body("hello");
        assert!(msg.body_complete());
        assert_eq!(msg.body_bytes(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn empty_body_bytes() {
        let msg = TransportMessage::request("GET", "/");
        assert_eq!(msg.body_bytes(), Bytes::new());
        assert_eq!(msg.body_len(), 0);
    }

    #[test]
    fn property_accessors() {
        let mut msg = TransportMessage::request("GET", "/");
        msg.set_property(properties::REMOTE_ADDRESS, "10.0.0.1");
        msg.set_property(properties::REMOTE_PORT, 49152_u16);
        msg.set_property(properties::SECURE, false);
        assert_eq!(msg.property_str(properties::REMOTE_ADDRESS), Some("10.0.0.1"));
        assert_eq!(msg.property_u64(properties::REMOTE_PORT), Some(49152));
        assert_eq!(msg.property_bool(properties::SECURE), Some(false));
        assert_eq!(msg.property("missing"), None);
    }

    #[test]
    fn property_overwrite() {
        let mut msg = TransportMessage::request("GET", "/");
        msg.set_property(properties::HOST, "a");
        msg.set_property(properties::HOST, "b");
        assert_eq!(msg.property_str(properties::HOST), Some("b"));
    }

    #[test]
    fn headers_via_message() {
        let mut msg = TransportMessage::request("GET", "/");
        msg.headers_mut().append("Host", "localhost:8490");
        assert_eq!(msg.headers().get("host"), Some("localhost:8490"));
    }
}
