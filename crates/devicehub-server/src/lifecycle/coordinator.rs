//! Drives accepted device connections through their lifecycle.
//!
//! `Accepted -> Handshaking -> Online -> Offline`. The protocol engine owns
//! the handshake; the coordinator reacts to its signals by updating the
//! registry and publishing status events.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

use crate::error::ConnectionError;
use crate::events::{DeviceEvent, EventNotifier};
use crate::protocol::{HandshakeInfo, ProtocolEngine, SessionSignal, SessionSignals};
use crate::registry::{DeviceAttribute, DeviceRegistry, DeviceSession};

/// Pause after a failed accept.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the device listener and the per-connection signal handlers.
pub struct Coordinator {
    registry: Arc<DeviceRegistry>,
    notifier: Arc<dyn EventNotifier>,
    engine: Arc<dyn ProtocolEngine>,
    /// TTL stamped on published status events.
    event_ttl_secs: u32,
    next_connection_id: AtomicU64,
}

impl Coordinator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        notifier: Arc<dyn EventNotifier>,
        engine: Arc<dyn ProtocolEngine>,
        event_ttl_secs: u32,
    ) -> Self {
        Self {
            registry,
            notifier,
            engine,
            event_ttl_secs,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Open the device listener.
    pub async fn bind(addr: &str) -> Result<TcpListener, ConnectionError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| ConnectionError::Bind {
                addr: addr.to_string(),
                source,
            })
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// A connection that cannot be wired up is logged and dropped; the
    /// listener keeps running. Sessions already online are not closed on
    /// shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        match listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "Device listener started"),
            Err(e) => warn!(error = %e, "Device listener started on unknown address"),
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Device listener shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = Arc::clone(&self).accept_connection(stream, peer) {
                            warn!(peer = %peer, error = %e, "Dropping connection");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }

    /// Hand a freshly accepted stream to the protocol engine and watch its
    /// signals in a background task. Returns the assigned connection id.
    pub fn accept_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<u64, ConnectionError> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        stream.set_nodelay(true)?;
        let signals = self.engine.start_protocol(stream, peer)?;
        debug!(connection_id, peer = %peer, "Connection accepted");

        tokio::spawn(self.handle_signals(connection_id, signals));
        Ok(connection_id)
    }

    async fn handle_signals(self: Arc<Self>, connection_id: u64, mut signals: SessionSignals) {
        let mut session: Option<Arc<DeviceSession>> = None;

        while let Some(signal) = signals.recv().await {
            match signal {
                SessionSignal::Ready(info) => {
                    if session.is_some() {
                        warn!(connection_id, "Ignoring repeated ready signal");
                        continue;
                    }
                    session = Some(self.on_ready(connection_id, info).await);
                }
                SessionSignal::Disconnect { reason } => {
                    self.finish(connection_id, session, &reason).await;
                    return;
                }
            }
        }

        self.finish(connection_id, session, "signal channel closed")
            .await;
    }

    async fn finish(&self, connection_id: u64, session: Option<Arc<DeviceSession>>, reason: &str) {
        match session {
            Some(session) => self.on_disconnect(&session, reason).await,
            None => debug!(connection_id, reason, "Connection closed before handshake"),
        }
    }

    /// Bring a device online after a successful handshake.
    #[instrument(skip(self, info), fields(core_id = %info.core_id))]
    pub async fn on_ready(&self, connection_id: u64, info: HandshakeInfo) -> Arc<DeviceSession> {
        let core_id = info.core_id.clone();
        let session = Arc::new(DeviceSession::new(
            connection_id,
            info.core_id,
            info.remote_ip,
            info.product_id,
            info.firmware_version,
        ));
        let registration = self.registry.register_session(Arc::clone(&session)).await;

        let mut patch = vec![DeviceAttribute::Ip(Some(info.remote_ip.to_string()))];
        if info.product_id.is_some() {
            patch.push(DeviceAttribute::ProductId(info.product_id));
        }
        if registration.record.firmware_version.is_none() && info.firmware_version.is_some() {
            patch.push(DeviceAttribute::FirmwareVersion(info.firmware_version));
        }
        let changed = self.registry.set_attributes(&core_id, patch).await;
        if registration.created && !changed {
            self.registry.schedule_persist(&core_id).await;
        }

        info!(
            connection_id,
            ip = %info.remote_ip,
            created = registration.created,
            "Device online"
        );
        self.notifier
            .publish(DeviceEvent::online(&core_id, self.event_ttl_secs));
        session
    }

    /// Take a device offline, unless `session` has already been superseded.
    #[instrument(skip(self, session), fields(core_id = %session.core_id))]
    pub async fn on_disconnect(&self, session: &Arc<DeviceSession>, reason: &str) {
        if self.registry.unregister_session(session).await {
            info!(connection_id = session.connection_id, reason, "Device offline");
            self.notifier
                .publish(DeviceEvent::offline(&session.core_id, self.event_ttl_secs));
        }
    }
}
