//! Connection lifecycle: accept, handshake, online, offline.

mod coordinator;

pub use coordinator::Coordinator;
