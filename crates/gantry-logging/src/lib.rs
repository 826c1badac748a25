//! # gantry-logging
//!
//! `tracing` subscriber setup for Gantry binaries and tests.
//!
//! The transport crates emit structured `tracing` events with connection and
//! route fields; this crate only installs the subscriber that renders them.
//! Embedders that already have a subscriber simply never call [`init`].

#![deny(unsafe_code)]

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber with human-readable stderr output.
///
/// `RUST_LOG` overrides `default_level` when set. Call once at startup;
/// subsequent calls are no-ops.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a subscriber is already installed
    if subscriber.try_init().is_ok() {
        debug!(default_level, "logging initialized");
    }
}

/// Initialize the global subscriber with JSON output on stderr.
///
/// One event per line, suitable for log shippers. `RUST_LOG` overrides
/// `default_level` when set.
pub fn init_json(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    if subscriber.try_init().is_ok() {
        debug!(default_level, "logging initialized");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
