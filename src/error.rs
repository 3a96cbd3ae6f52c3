//! Error types for the wallbox bridge.
//!
//! Transport failures are recovered locally by the link manager (drop the
//! connection, enter the retry cooldown) and are never surfaced to HTTP
//! callers; accessors fall back to the last cached register values instead.

use std::time::Duration;

/// Result alias used throughout the crate.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Failure taxonomy for the Modbus link and process bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The device did not answer within the per-call bus timeout.
    #[error("bus timeout after {0:?}")]
    Timeout(Duration),

    /// Transport-level failure reported by the Modbus client
    /// (CRC mismatch, malformed frame, broken pipe).
    #[error("modbus transport error: {0}")]
    Protocol(#[from] tokio_modbus::Error),

    /// The device answered with a Modbus exception code.
    #[error("device exception: {0}")]
    Exception(String),

    /// The serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Register I/O was requested while the link is down and the retry
    /// cooldown has not expired.
    #[error("link not connected")]
    NotConnected,

    /// Invalid configuration or failed bootstrap (log file, bind address).
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Whether this failure should drop the link and start the reconnect
    /// cooldown. Device exceptions keep the link up: the bus itself answered.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BridgeError::Timeout(_)
                | BridgeError::Protocol(_)
                | BridgeError::Serial(_)
                | BridgeError::NotConnected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(BridgeError::Timeout(Duration::from_millis(500)).is_transport());
        assert!(BridgeError::NotConnected.is_transport());
        assert!(!BridgeError::Exception("IllegalDataAddress".into()).is_transport());
        assert!(!BridgeError::Config("bad port".into()).is_transport());
    }
}
