//! Store contracts consumed by the registry, persistence sync, and claims.

use async_trait::async_trait;

use super::db::DeviceDatabase;
use super::models::{Device, DeviceKey, DeviceParams, User};
use devicehub_core::db::DatabaseError;

/// Record store for devices and their keys.
///
/// Every call may fail. A unique-constraint rejection is reported as
/// [`DatabaseError::Duplicate`] so callers can tell it apart from other faults.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert a device row and return it with its store-assigned fields.
    async fn insert_device(&self, device: &DeviceParams<'_>) -> Result<Device, DatabaseError>;

    /// Update the device row with the given id. Returns `false` if no such row
    /// exists.
    async fn update_device(&self, id: i64, device: &DeviceParams<'_>)
    -> Result<bool, DatabaseError>;

    async fn find_device(&self, core_id: &str) -> Result<Option<Device>, DatabaseError>;

    async fn all_devices(&self) -> Result<Vec<Device>, DatabaseError>;

    async fn find_device_key(&self, core_id: &str) -> Result<Option<DeviceKey>, DatabaseError>;

    /// Create or replace the public key of a device, keeping any claim code.
    async fn upsert_device_public_key(
        &self,
        core_id: &str,
        public_key: &str,
    ) -> Result<(), DatabaseError>;

    /// Record a claim in one transaction: set the device registrar (when
    /// given) and upsert the key row's claim code, creating the key row with
    /// an empty public key if needed.
    async fn save_claim(
        &self,
        core_id: &str,
        claim_code: &str,
        registrar: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Clear the claim code if it currently equals `claim_code`. Returns
    /// whether a code was consumed.
    async fn consume_claim_code(&self, core_id: &str, claim_code: &str)
    -> Result<bool, DatabaseError>;
}

/// User lookup used to resolve the owner of a claim code.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_claim_code(&self, claim_code: &str)
    -> Result<Option<User>, DatabaseError>;
}

#[async_trait]
impl DeviceStore for DeviceDatabase {
    async fn insert_device(&self, device: &DeviceParams<'_>) -> Result<Device, DatabaseError> {
        self.create_device(device).await
    }

    async fn update_device(
        &self,
        id: i64,
        device: &DeviceParams<'_>,
    ) -> Result<bool, DatabaseError> {
        self.update_device_row(id, device).await
    }

    async fn find_device(&self, core_id: &str) -> Result<Option<Device>, DatabaseError> {
        self.get_device_by_core_id(core_id).await
    }

    async fn all_devices(&self) -> Result<Vec<Device>, DatabaseError> {
        self.list_devices().await
    }

    async fn find_device_key(&self, core_id: &str) -> Result<Option<DeviceKey>, DatabaseError> {
        self.get_device_key(core_id).await
    }

    async fn upsert_device_public_key(
        &self,
        core_id: &str,
        public_key: &str,
    ) -> Result<(), DatabaseError> {
        self.set_device_public_key(core_id, public_key).await
    }

    async fn save_claim(
        &self,
        core_id: &str,
        claim_code: &str,
        registrar: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.record_claim(core_id, claim_code, registrar).await
    }

    async fn consume_claim_code(
        &self,
        core_id: &str,
        claim_code: &str,
    ) -> Result<bool, DatabaseError> {
        self.clear_claim_code(core_id, claim_code).await
    }
}

#[async_trait]
impl UserDirectory for DeviceDatabase {
    async fn find_user_by_claim_code(
        &self,
        claim_code: &str,
    ) -> Result<Option<User>, DatabaseError> {
        self.get_user_by_claim_code(claim_code).await
    }
}
