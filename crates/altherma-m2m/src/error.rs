//! Transport error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("No response for {target} within {timeout:?}")]
    Timeout { target: String, timeout: Duration },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Faults that make every further query on this connection pointless
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NotConnected)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}
