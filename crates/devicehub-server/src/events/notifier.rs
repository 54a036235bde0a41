//! Device status events and the in-process broadcast notifier.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::registry::CoreId;
use devicehub_core::db::iso8601_now;

/// Name under which connectivity transitions are published.
pub const STATUS_EVENT: &str = "spark/status";

/// Connectivity state carried by a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// One published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEvent {
    pub is_public: bool,
    pub name: String,
    /// Optional setup flag forwarded to subscribers untouched.
    pub setup: Option<String>,
    pub data: String,
    pub ttl_secs: u32,
    /// ISO-8601 UTC timestamp.
    pub published_at: String,
    pub core_id: String,
}

impl DeviceEvent {
    /// A public `spark/status` event stamped with the current time.
    pub fn status(core_id: &CoreId, status: DeviceStatus, ttl_secs: u32) -> Self {
        Self {
            is_public: true,
            name: STATUS_EVENT.to_string(),
            setup: None,
            data: status.as_str().to_string(),
            ttl_secs,
            published_at: iso8601_now(),
            core_id: core_id.to_string(),
        }
    }

    pub fn online(core_id: &CoreId, ttl_secs: u32) -> Self {
        Self::status(core_id, DeviceStatus::Online, ttl_secs)
    }

    pub fn offline(core_id: &CoreId, ttl_secs: u32) -> Self {
        Self::status(core_id, DeviceStatus::Offline, ttl_secs)
    }
}

/// Sink for connectivity events. Publishing is fire-and-forget.
pub trait EventNotifier: Send + Sync {
    fn publish(&self, event: DeviceEvent);
}

/// Fans events out to every in-process subscriber.
///
/// Subscribers that fall more than `capacity` events behind lose the oldest
/// ones. Publishing with no subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<DeviceEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }
}

impl EventNotifier for BroadcastNotifier {
    fn publish(&self, event: DeviceEvent) {
        let core_id = event.core_id.clone();
        let data = event.data.clone();
        match self.tx.send(event) {
            Ok(receivers) => debug!(core_id = %core_id, data = %data, receivers, "Event published"),
            Err(_) => debug!(core_id = %core_id, data = %data, "Event dropped, no subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_shape() {
        let core_id = CoreId::parse("A1B2").unwrap();
        let event = DeviceEvent::status(&core_id, DeviceStatus::Online, 60);

        assert!(event.is_public);
        assert_eq!(event.name, "spark/status");
        assert!(event.setup.is_none());
        assert_eq!(event.data, "online");
        assert_eq!(event.ttl_secs, 60);
        assert_eq!(event.core_id, "A1B2");
        assert!(event.published_at.ends_with('Z'));
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        let core_id = CoreId::parse("a1b2").unwrap();
        notifier.publish(DeviceEvent::offline(&core_id, 60));

        assert_eq!(rx1.recv().await.unwrap().data, "offline");
        assert_eq!(rx2.recv().await.unwrap().core_id, "a1b2");
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let notifier = BroadcastNotifier::new(1);
        let core_id = CoreId::parse("a1b2").unwrap();
        notifier.publish(DeviceEvent::status(&core_id, DeviceStatus::Online, 60));
    }
}
