//! Live device session handle.

use std::net::IpAddr;

use devicehub_core::db::unix_timestamp;

use super::CoreId;

/// One connected device's active session.
///
/// Handles are shared as `Arc<DeviceSession>` and compared by pointer, so a
/// disconnect from a superseded session can never evict its replacement.
#[derive(Debug)]
pub struct DeviceSession {
    /// Listener-assigned id of the underlying connection.
    pub connection_id: u64,
    pub core_id: CoreId,
    pub remote_ip: IpAddr,
    pub product_id: Option<i64>,
    pub firmware_version: Option<i64>,
    /// Unix seconds when the handshake completed.
    pub connected_at: i64,
}

impl DeviceSession {
    pub fn new(
        connection_id: u64,
        core_id: CoreId,
        remote_ip: IpAddr,
        product_id: Option<i64>,
        firmware_version: Option<i64>,
    ) -> Self {
        Self {
            connection_id,
            core_id,
            remote_ip,
            product_id,
            firmware_version,
            connected_at: unix_timestamp(),
        }
    }
}
