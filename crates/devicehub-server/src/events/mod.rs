//! Connectivity event publishing.

mod notifier;

pub use notifier::{BroadcastNotifier, DeviceEvent, DeviceStatus, EventNotifier, STATUS_EVENT};
