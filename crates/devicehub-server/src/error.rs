//! Error types for the device server.

use devicehub_core::db::DatabaseError;

use crate::protocol::ProtocolError;

/// Errors surfaced by registry, persistence, and claim operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    /// Also returned when the device has no key row.
    #[error("Claim code mismatch for device {0}")]
    ClaimCodeMismatch(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors wiring or serving device connections.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
