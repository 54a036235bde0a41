//! In-memory device registry.
//!
//! Holds the authoritative cache of device attributes, the live session of
//! every connected device, and the set of ids known to exist. All three maps
//! sit behind one lock so every operation is atomic across them.

mod core_id;
mod device;
mod session;

pub use core_id::{CoreId, InvalidCoreId};
pub use device::{DeviceAttribute, DeviceRecord};
pub use session::DeviceSession;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::storage::Device;

#[derive(Default)]
struct RegistryState {
    attributes: HashMap<CoreId, DeviceRecord>,
    sessions: HashMap<CoreId, Arc<DeviceSession>>,
    known: HashSet<CoreId>,
}

impl RegistryState {
    fn entry(&mut self, core_id: &CoreId) -> &mut DeviceRecord {
        self.attributes
            .entry(core_id.clone())
            .or_insert_with(|| DeviceRecord::placeholder(core_id.clone()))
    }
}

/// Receiving half of the write-back queue, drained by
/// [`PersistenceSync::run`](crate::sync::PersistenceSync::run).
pub struct WriteBackQueue {
    rx: mpsc::Receiver<CoreId>,
}

impl WriteBackQueue {
    /// Next device id awaiting persistence, or `None` once every registry
    /// handle is gone.
    pub async fn next(&mut self) -> Option<CoreId> {
        self.rx.recv().await
    }
}

/// Outcome of [`DeviceRegistry::register_session`].
#[derive(Debug)]
pub struct Registration {
    /// The attribute entry did not exist before this call.
    pub created: bool,
    /// The session this one replaced, if the device was already online.
    pub superseded: Option<Arc<DeviceSession>>,
    /// Cached attributes after registration.
    pub record: DeviceRecord,
}

/// Process-wide registry of devices and their live sessions.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    state: Arc<RwLock<RegistryState>>,
    write_back: Option<mpsc::Sender<CoreId>>,
}

impl DeviceRegistry {
    /// A registry without write-back: attribute changes stay in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose attribute changes are queued for persistence.
    pub fn with_write_back(capacity: usize) -> (Self, WriteBackQueue) {
        let (tx, rx) = mpsc::channel(capacity);
        let registry = Self {
            state: Arc::default(),
            write_back: Some(tx),
        };
        (registry, WriteBackQueue { rx })
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Cached attributes of a device, creating an empty entry if none exists.
    pub async fn get_attributes(&self, core_id: &CoreId) -> DeviceRecord {
        self.state.write().await.entry(core_id).clone()
    }

    /// Cached attributes of a device without creating an entry.
    pub async fn peek_attributes(&self, core_id: &CoreId) -> Option<DeviceRecord> {
        self.state.read().await.attributes.get(core_id).cloned()
    }

    /// Set one attribute. See [`set_attributes`](Self::set_attributes).
    pub async fn set_attribute(&self, core_id: &CoreId, attribute: DeviceAttribute) -> bool {
        self.set_attributes(core_id, [attribute]).await
    }

    /// Merge attributes into the cached device and, if anything changed,
    /// queue a persistence write. Returns before the write happens.
    pub async fn set_attributes(
        &self,
        core_id: &CoreId,
        patch: impl IntoIterator<Item = DeviceAttribute>,
    ) -> bool {
        let changed = {
            let mut state = self.state.write().await;
            let record = state.entry(core_id);
            patch
                .into_iter()
                .fold(false, |changed, attr| record.apply(attr) | changed)
        };

        if changed {
            self.schedule_persist(core_id).await;
        }
        changed
    }

    /// Queue a persistence write for a device.
    pub async fn schedule_persist(&self, core_id: &CoreId) {
        let Some(tx) = &self.write_back else {
            debug!(core_id = %core_id, "No write-back configured, change stays in memory");
            return;
        };
        if tx.send(core_id.clone()).await.is_err() {
            warn!(core_id = %core_id, "Write-back worker stopped, dropping persistence request");
        }
    }

    /// Replace the attribute cache and known-id set with store contents.
    ///
    /// Entries of devices that are online but absent from `records` are kept
    /// so a live session never loses its attributes.
    pub async fn replace_all(&self, records: Vec<DeviceRecord>) {
        let mut state = self.state.write().await;

        let mut attributes: HashMap<CoreId, DeviceRecord> = records
            .into_iter()
            .map(|record| (record.core_id.clone(), record))
            .collect();
        for core_id in state.sessions.keys() {
            if !attributes.contains_key(core_id) {
                if let Some(record) = state.attributes.get(core_id) {
                    attributes.insert(core_id.clone(), record.clone());
                }
            }
        }

        let mut known: HashSet<CoreId> = attributes.keys().cloned().collect();
        known.extend(state.sessions.keys().cloned());

        state.attributes = attributes;
        state.known = known;
    }

    /// Overwrite a cached device with a store row.
    pub async fn refresh(&self, record: DeviceRecord) {
        let mut state = self.state.write().await;
        state.known.insert(record.core_id.clone());
        state.attributes.insert(record.core_id.clone(), record);
    }

    /// Record the store-assigned identity of a device without touching the
    /// attributes that may have changed since the write was issued.
    pub async fn adopt_store_identity(&self, core_id: &CoreId, internal_id: i64, created_at: i64) {
        let mut state = self.state.write().await;
        let record = state.entry(core_id);
        record.internal_id = Some(internal_id);
        record.created_at = Some(created_at);
        state.known.insert(core_id.clone());
    }

    /// Merge a store row into the cached device (see
    /// [`DeviceRecord::backfill`]) and return the merged record.
    pub async fn merge_store_row(&self, core_id: &CoreId, row: Device) -> DeviceRecord {
        let mut state = self.state.write().await;
        state.known.insert(core_id.clone());
        let record = state.entry(core_id);
        record.backfill(row);
        record.clone()
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn get_session(&self, core_id: &CoreId) -> Option<Arc<DeviceSession>> {
        self.state.read().await.sessions.get(core_id).cloned()
    }

    /// Install a live session, superseding any previous one for the device.
    ///
    /// A device seen for the first time gets an attribute entry seeded from
    /// the session (no name, no registrar, group 0).
    pub async fn register_session(&self, session: Arc<DeviceSession>) -> Registration {
        let core_id = session.core_id.clone();
        let mut state = self.state.write().await;

        let created = !state.attributes.contains_key(&core_id);
        if created {
            let mut record = DeviceRecord::placeholder(core_id.clone());
            record.ip = Some(session.remote_ip.to_string());
            record.product_id = session.product_id;
            record.firmware_version = session.firmware_version;
            state.attributes.insert(core_id.clone(), record);
        }
        state.known.insert(core_id.clone());

        let superseded = state.sessions.insert(core_id.clone(), session);
        let record = state.entry(&core_id).clone();

        if superseded.is_some() {
            info!(core_id = %core_id, "Device session superseded by a newer connection");
        }

        Registration {
            created,
            superseded,
            record,
        }
    }

    /// Remove a live session, but only if `session` is the one currently
    /// registered. Returns whether it was removed.
    pub async fn unregister_session(&self, session: &Arc<DeviceSession>) -> bool {
        let mut state = self.state.write().await;
        match state.sessions.get(&session.core_id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                state.sessions.remove(&session.core_id);
                true
            }
            Some(_) => {
                debug!(
                    core_id = %session.core_id,
                    connection_id = session.connection_id,
                    "Ignoring disconnect of superseded session"
                );
                false
            }
            None => false,
        }
    }

    /// Snapshot of every device id known to exist.
    pub async fn all_known_ids(&self) -> HashSet<CoreId> {
        self.state.read().await.known.clone()
    }

    pub async fn is_known(&self, core_id: &CoreId) -> bool {
        self.state.read().await.known.contains(core_id)
    }

    /// Snapshot of every live session.
    pub async fn all_live_sessions(&self) -> HashMap<CoreId, Arc<DeviceSession>> {
        self.state.read().await.sessions.clone()
    }

    /// First live session whose cached name equals `name`.
    pub async fn find_by_name(&self, name: &str) -> Option<Arc<DeviceSession>> {
        let state = self.state.read().await;
        state
            .attributes
            .values()
            .filter(|record| record.name.as_deref() == Some(name))
            .find_map(|record| state.sessions.get(&record.core_id).cloned())
    }

    pub async fn is_online(&self, core_id: &CoreId) -> bool {
        self.state.read().await.sessions.contains_key(core_id)
    }

    pub async fn live_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}
