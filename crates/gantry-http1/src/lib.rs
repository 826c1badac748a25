//! # gantry-http1
//!
//! HTTP/1.1 wire codecs for the Gantry connector.
//!
//! Both sides of the connector speak through `tokio-util` codecs that
//! surface messages at chunk granularity:
//!
//! - [`server::ServerCodec`]: decodes inbound requests into
//!   [`types::RequestEvent`]s, encodes outbound [`types::ResponseEvent`]s
//! - [`client::ClientCodec`]: the mirror image for pooled outbound
//!   connections
//! - Body framing: `Content-Length`, chunked transfer-encoding, and (for
//!   responses) read-to-EOF
//!
//! Heads are parsed with `httparse`; header order and spelling are preserved
//! end to end.

#![deny(unsafe_code)]

pub mod client;
mod codec;
pub mod errors;
pub mod server;
pub mod types;
