//! Contract between the connection coordinator and a device protocol engine.
//!
//! An engine takes ownership of an accepted stream and reports the session's
//! progress over a channel: at most one [`SessionSignal::Ready`] once the
//! handshake completes, then exactly one [`SessionSignal::Disconnect`]. A
//! channel that closes without a disconnect counts as one.

mod line;

pub use line::{Hello, LineHandshake};

use std::net::{IpAddr, SocketAddr};

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::registry::CoreId;

/// Capacity of the per-session signal channel.
pub const SIGNAL_CAPACITY: usize = 4;

/// What the device announced during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub core_id: CoreId,
    pub remote_ip: IpAddr,
    pub product_id: Option<i64>,
    pub firmware_version: Option<i64>,
}

/// Progress of one device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Ready(HandshakeInfo),
    Disconnect { reason: String },
}

pub type SessionSignals = mpsc::Receiver<SessionSignal>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// A device wire protocol.
pub trait ProtocolEngine: Send + Sync {
    /// Take over `stream` and start driving the session in the background.
    fn start_protocol(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<SessionSignals, ProtocolError>;
}
