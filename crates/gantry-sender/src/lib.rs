//! # gantry-sender
//!
//! The outbound half of the Gantry connector: bounded per-route connection
//! pools and the gateway send path.
//!
//! - Route identity: `(host, port, secure)` keys one pool
//! - Bounded pools with checkout exclusivity and idle validation
//! - Connection manager: pool registry plus the inbound-session binding table
//! - Target channel: request/response exchanges over a checked-out connection
//! - [`connector::HttpClientConnector`]: forward a message, correlate the
//!   response back through its callback

#![deny(unsafe_code)]

pub mod channel;
pub mod config;
pub mod connector;
pub mod manager;
pub mod pool;
pub mod route;
