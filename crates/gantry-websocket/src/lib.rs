//! # gantry-websocket
//!
//! The duplex half of the Gantry connector: everything a message processor
//! sees once (or while) a plain HTTP connection is upgraded to WebSocket.
//!
//! - WebSocket message model: a closed enum over init/text/binary/control/close
//! - Session handles with weak back-references for correlation
//! - The upgrade offer a processor accepts or cancels to drive the handshake
//! - RFC 6455 handshake helpers (accept key, sub-protocol selection)
//! - The [`handler::WebSocketHandler`] contract

#![deny(unsafe_code)]

pub mod handler;
pub mod handshake;
pub mod message;
pub mod offer;
pub mod session;
