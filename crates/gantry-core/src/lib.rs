//! # gantry-core
//!
//! Foundation types for the Gantry HTTP/WebSocket transport connector.
//!
//! This crate provides the vocabulary shared by the listener and sender sides:
//!
//! - **Transport message**: the neutral envelope ([`message::TransportMessage`])
//!   carrying headers, chunked body content, and connection metadata between
//!   wire handling and application logic
//! - **Response callback**: the one-shot handle ([`callback::ResponseCallback`])
//!   a processor uses to deliver its reply back to the owning connection
//! - **Contracts**: [`processor::MessageProcessor`] (receive-and-acknowledge)
//!   and [`processor::RequestValidator`] (pre-dispatch veto)
//! - **Observer**: [`observer::TransportObserver`] lifecycle hooks, no-op by default
//! - **Errors**: [`errors::TransportError`] taxonomy via `thiserror`

#![deny(unsafe_code)]

pub mod callback;
pub mod errors;
pub mod headers;
pub mod ids;
pub mod message;
pub mod observer;
pub mod processor;
