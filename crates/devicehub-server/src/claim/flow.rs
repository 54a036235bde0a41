//! Claim code handling.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::{info, instrument};

use crate::error::RegistryError;
use crate::registry::{CoreId, DeviceAttribute, DeviceRegistry};
use crate::storage::{DeviceStore, UserDirectory};

/// Result of [`ClaimFlow::save_claim_code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// The user now registered as the device owner, if the code belongs to one.
    pub registrar: Option<String>,
}

/// Claim code checks and writes for devices.
pub struct ClaimFlow {
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn DeviceStore>,
    users: Arc<dyn UserDirectory>,
}

impl ClaimFlow {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        store: Arc<dyn DeviceStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            registry,
            store,
            users,
        }
    }

    /// Succeed only if the device has a key row whose claim code equals
    /// `code`. Does not consume the code.
    #[instrument(skip(self, code), fields(core_id = %core_id))]
    pub async fn compare_claim_code(&self, core_id: &CoreId, code: &str) -> Result<(), RegistryError> {
        let stored = self.store.find_device_key(core_id.as_str()).await?;
        match stored.and_then(|key| key.claim_code) {
            Some(stored) if codes_match(&stored, code) => Ok(()),
            _ => Err(RegistryError::ClaimCodeMismatch(core_id.to_string())),
        }
    }

    /// Record `code` as the pending claim code of a device.
    ///
    /// If a user owns `code`, that user becomes the device registrar in the
    /// same transaction. A code without an owner is still stored. Any
    /// previous code is overwritten.
    #[instrument(skip(self, code), fields(core_id = %core_id))]
    pub async fn save_claim_code(
        &self,
        core_id: &CoreId,
        code: &str,
    ) -> Result<ClaimOutcome, RegistryError> {
        if !self.registry.is_known(core_id).await
            && self.store.find_device(core_id.as_str()).await?.is_none()
        {
            return Err(RegistryError::DeviceNotFound(core_id.to_string()));
        }

        let registrar = self
            .users
            .find_user_by_claim_code(code)
            .await?
            .map(|user| user.id);

        self.store
            .save_claim(core_id.as_str(), code, registrar.as_deref())
            .await?;

        if let Some(user_id) = &registrar {
            self.registry
                .set_attribute(core_id, DeviceAttribute::Registrar(Some(user_id.clone())))
                .await;
            info!(registrar = %user_id, "Device claimed");
        } else {
            info!("Claim code stored without a matching user");
        }

        Ok(ClaimOutcome { registrar })
    }

    /// Compare and clear the claim code in one step. A code can be redeemed
    /// once.
    #[instrument(skip(self, code), fields(core_id = %core_id))]
    pub async fn redeem_claim_code(&self, core_id: &CoreId, code: &str) -> Result<(), RegistryError> {
        if self
            .store
            .consume_claim_code(core_id.as_str(), code)
            .await?
        {
            info!("Claim code redeemed");
            Ok(())
        } else {
            Err(RegistryError::ClaimCodeMismatch(core_id.to_string()))
        }
    }
}

/// Constant-time comparison of two claim codes.
fn codes_match(stored: &str, code: &str) -> bool {
    stored.as_bytes().ct_eq(code.as_bytes()).into()
}
