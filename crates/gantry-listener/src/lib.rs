//! # gantry-listener
//!
//! The inbound half of the Gantry connector: accept TCP connections, assemble
//! HTTP/1.1 requests into transport messages, dispatch them to a processor,
//! and write the correlated responses back in arrival order.
//!
//! - One task per connection, strictly serial request handling
//! - Keep-alive and pipelined requests on the same socket
//! - WebSocket upgrades negotiated through [`gantry_websocket::offer`]
//! - [`server::GantryListener`]: bind, accept, drain on shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod server;

mod connection;
mod upgrade;
mod ws_driver;
