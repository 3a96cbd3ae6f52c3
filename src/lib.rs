//! # hdec-bridge — Heidelberg Energy Control wallbox bridge
//!
//! Bridges one or more Modbus-RTU-speaking "Heidelberg Energy Control" EV
//! charging wallboxes to consumers that expect a go-e compatible
//! JSON-over-HTTP charger-status API (openWB and similar).
//!
//! ## Architecture
//!
//! Each configured wallbox gets its own adapter owning a register cache with
//! bounded staleness and a link manager with a lazy-connect / cooldown-retry
//! policy. Refreshes happen synchronously on whichever accessor first sees an
//! expired cache; there is no background polling. While a link is down,
//! accessors serve the last cached values (stale but available) until the
//! next reconnect window.
//!
//! | Layer | Module |
//! |-------|--------|
//! | Register map + cache | [`registers`] |
//! | Transport session (Modbus RTU over serial) | [`transport`] |
//! | Link manager (connect, probe, cooldown) | [`link`] |
//! | Wallbox adapter (typed accessors, commands) | [`wallbox`] |
//! | go-e status rendering | [`status`] |
//! | Fleet registry | [`fleet`] |
//! | HTTP dispatcher | [`http`] |
//! | Configuration + logging bootstrap | [`config`] |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use hdec_bridge::{config, http, Fleet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = config::load(Path::new("hdec-bridge.toml"))?;
//!     let fleet = Arc::new(Fleet::open(&cfg));
//!     let app = http::router(Arc::clone(&fleet), cfg.server.assets_dir.clone());
//!     let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.server.port)).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and result handling
pub mod error;

/// Heidelberg register map and the TTL-bounded register cache
pub mod registers;

/// Transport seam and the serial Modbus RTU session
pub mod transport;

/// Connection lifecycle: lazy connect, probe, reconnect cooldown
pub mod link;

/// Typed wallbox accessors and commands
pub mod wallbox;

/// go-e compatible status rendering
pub mod status;

/// Registry of all configured wallboxes
pub mod fleet;

// ============================================================================
// Boundary modules
// ============================================================================

/// HTTP dispatcher (status, raw registers, commands, templated pages)
pub mod http;

/// Configuration loading and logging bootstrap
pub mod config;

#[cfg(test)]
pub(crate) mod testutil;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use fleet::Fleet;
pub use link::{LinkManager, DEFAULT_RETRY_COOLDOWN};
pub use registers::{RegisterCache, REGISTER_COUNT};
pub use status::{render, GoeStatus, StatusSnapshot};
pub use transport::{
    shared_port, SerialTransport, SharedPort, Transport, BAUD_RATE, DEFAULT_BUS_TIMEOUT,
};
pub use wallbox::{ChargingState, Phase, WallboxAdapter, DEFAULT_CACHE_TTL};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
