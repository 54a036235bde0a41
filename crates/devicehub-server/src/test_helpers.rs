//! Shared fakes and helpers for unit tests.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::events::{DeviceEvent, EventNotifier};
use crate::protocol::{LineHandshake, ProtocolEngine, ProtocolError, SessionSignals};
use crate::storage::{DatabaseError, Device, DeviceKey, DeviceParams, DeviceStore};

/// A store whose every call fails with a query error.
pub struct FailingStore;

fn unavailable<T>() -> Result<T, DatabaseError> {
    Err(DatabaseError::Query("store unavailable".into()))
}

#[async_trait]
impl DeviceStore for FailingStore {
    async fn insert_device(&self, _device: &DeviceParams<'_>) -> Result<Device, DatabaseError> {
        unavailable()
    }

    async fn update_device(
        &self,
        _id: i64,
        _device: &DeviceParams<'_>,
    ) -> Result<bool, DatabaseError> {
        unavailable()
    }

    async fn find_device(&self, _core_id: &str) -> Result<Option<Device>, DatabaseError> {
        unavailable()
    }

    async fn all_devices(&self) -> Result<Vec<Device>, DatabaseError> {
        unavailable()
    }

    async fn find_device_key(&self, _core_id: &str) -> Result<Option<DeviceKey>, DatabaseError> {
        unavailable()
    }

    async fn upsert_device_public_key(
        &self,
        _core_id: &str,
        _public_key: &str,
    ) -> Result<(), DatabaseError> {
        unavailable()
    }

    async fn save_claim(
        &self,
        _core_id: &str,
        _claim_code: &str,
        _registrar: Option<&str>,
    ) -> Result<(), DatabaseError> {
        unavailable()
    }

    async fn consume_claim_code(
        &self,
        _core_id: &str,
        _claim_code: &str,
    ) -> Result<bool, DatabaseError> {
        unavailable()
    }
}

/// Notifier that keeps every published event.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DeviceEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(core_id, data)` of every published event, in order.
    pub fn statuses(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .map(|e| (e.core_id, e.data))
            .collect()
    }
}

impl EventNotifier for RecordingNotifier {
    fn publish(&self, event: DeviceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Engine that refuses the first `refusals` connections, then hands the
/// rest to a [`LineHandshake`].
pub struct RefusingEngine {
    inner: LineHandshake,
    refusals: AtomicUsize,
}

impl RefusingEngine {
    pub fn new(refusals: usize) -> Self {
        Self {
            inner: LineHandshake::new(Duration::from_secs(1)),
            refusals: AtomicUsize::new(refusals),
        }
    }
}

impl ProtocolEngine for RefusingEngine {
    fn start_protocol(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<SessionSignals, ProtocolError> {
        let refuse = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(ProtocolError::Handshake("refused by test engine".into()));
        }
        self.inner.start_protocol(stream, peer)
    }
}

/// Poll `check` until it yields a value. Panics after five seconds.
pub async fn wait_for<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(value) = check().await {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s")
}
