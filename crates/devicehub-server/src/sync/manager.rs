//! Write-back of cached device attributes to the store.
//!
//! A single worker drains the registry's write-back queue, so writes for
//! one device reach the store in the order they were scheduled.

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::RegistryError;
use crate::registry::{CoreId, DeviceRecord, DeviceRegistry, WriteBackQueue};
use crate::storage::DeviceStore;

/// Suffix of the public key files imported by [`PersistenceSync::import_key_dir`].
const PUBLIC_KEY_SUFFIX: &str = ".pub.pem";

/// What a single [`PersistenceSync::persist`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A new row was created.
    Inserted { id: i64 },
    /// The existing row was overwritten.
    Updated { id: i64 },
    /// The insert collided with a row written elsewhere; the cache adopted
    /// that row and the merged attributes were written over it.
    AlreadyExists { id: i64 },
}

/// Keeps the store in step with the registry cache.
pub struct PersistenceSync {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn DeviceStore>,
}

impl PersistenceSync {
    pub fn new(registry: Arc<DeviceRegistry>, store: Arc<dyn DeviceStore>) -> Self {
        Self { registry, store }
    }

    /// Replace the registry cache with every stored device.
    ///
    /// On a store failure the registry is left as it was and the error is
    /// returned; callers may carry on with an empty cache.
    pub async fn bulk_load(&self) -> Result<usize, RegistryError> {
        let rows = match self.store.all_devices().await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to load devices from store");
                return Err(e.into());
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match CoreId::parse(&row.core_id) {
                Ok(core_id) => records.push(DeviceRecord::from_row(core_id, row)),
                Err(e) => warn!(id = row.id, error = %e, "Skipping stored device with invalid core id"),
            }
        }

        let count = records.len();
        self.registry.replace_all(records).await;
        info!(count, "Device registry loaded from store");
        Ok(count)
    }

    /// Write the cached attributes of one device to the store.
    ///
    /// Devices without a store id are inserted; the rest are updated. A row
    /// that vanished from the store is inserted again.
    pub async fn persist(&self, core_id: &CoreId) -> Result<PersistOutcome, RegistryError> {
        let record = self
            .registry
            .peek_attributes(core_id)
            .await
            .ok_or_else(|| RegistryError::DeviceNotFound(core_id.to_string()))?;

        if let Some(id) = record.internal_id {
            if self.store.update_device(id, &record.as_params()).await? {
                debug!(core_id = %core_id, id, "Device updated");
                return Ok(PersistOutcome::Updated { id });
            }
            warn!(core_id = %core_id, id, "Stored device row is gone, inserting again");
        }

        self.insert(core_id, &record).await
    }

    async fn insert(
        &self,
        core_id: &CoreId,
        record: &DeviceRecord,
    ) -> Result<PersistOutcome, RegistryError> {
        match self.store.insert_device(&record.as_params()).await {
            Ok(row) => {
                let id = row.id;
                self.registry
                    .adopt_store_identity(core_id, id, row.created_at)
                    .await;
                info!(core_id = %core_id, id, "Device inserted");
                Ok(PersistOutcome::Inserted { id })
            }
            Err(e) if e.is_duplicate() => {
                info!(core_id = %core_id, "Device already exists in store, merging");
                let Some(row) = self.store.find_device(core_id.as_str()).await? else {
                    return Err(e.into());
                };
                let id = row.id;
                let merged = self.registry.merge_store_row(core_id, row).await;
                self.store.update_device(id, &merged.as_params()).await?;
                Ok(PersistOutcome::AlreadyExists { id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the cached attributes of one device with its stored row.
    /// Returns `false` if the store has no such device.
    pub async fn reload(&self, core_id: &CoreId) -> Result<bool, RegistryError> {
        let Some(row) = self.store.find_device(core_id.as_str()).await? else {
            return Ok(false);
        };
        self.registry
            .refresh(DeviceRecord::from_row(core_id.clone(), row))
            .await;
        Ok(true)
    }

    /// Store the public key of a device.
    pub async fn add_device_key(
        &self,
        core_id: &CoreId,
        public_key: &str,
    ) -> Result<(), RegistryError> {
        self.store
            .upsert_device_public_key(core_id.as_str(), public_key)
            .await?;
        debug!(core_id = %core_id, "Device public key stored");
        Ok(())
    }

    /// Import every `<core_id>.pub.pem` file in `dir` as a device public key.
    ///
    /// A missing directory imports nothing. Files whose stem is not a valid
    /// core id are skipped. Returns the number of keys imported.
    pub async fn import_key_dir(&self, dir: &Path) -> Result<usize, RegistryError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "No device key directory");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut imported = 0;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(stem) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(PUBLIC_KEY_SUFFIX))
            else {
                continue;
            };
            let core_id = match CoreId::parse(stem) {
                Ok(core_id) => core_id,
                Err(e) => {
                    warn!(file = %entry.path().display(), error = %e, "Skipping device key file");
                    continue;
                }
            };

            let pem = tokio::fs::read_to_string(entry.path()).await?;
            self.add_device_key(&core_id, pem.trim()).await?;
            imported += 1;
        }

        info!(dir = %dir.display(), imported, "Device keys imported");
        Ok(imported)
    }

    /// Drain the write-back queue. Runs until the queue closes or the task
    /// is aborted.
    ///
    /// A failed write is logged and dropped; the next change to the same
    /// device writes the full record again.
    pub async fn run(self: Arc<Self>, mut queue: WriteBackQueue) {
        while let Some(core_id) = queue.next().await {
            match self.persist(&core_id).await {
                Ok(outcome) => debug!(core_id = %core_id, ?outcome, "Write-back applied"),
                Err(e) => error!(core_id = %core_id, error = %e, "Failed to persist device"),
            }
        }
        info!("Write-back worker stopped");
    }

    pub fn spawn(self: &Arc<Self>, queue: WriteBackQueue) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(queue))
    }
}
