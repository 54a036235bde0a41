//! Database queries for the device server.

use devicehub_core::db::{DatabaseError, unix_timestamp};

use super::db::DeviceDatabase;
use super::models::{Device, DeviceKey, DeviceParams, User};

impl DeviceDatabase {
    // =========================================================================
    // Device queries
    // =========================================================================

    /// Insert a device and return the stored row.
    pub async fn create_device(&self, device: &DeviceParams<'_>) -> Result<Device, DatabaseError> {
        let now = unix_timestamp();

        let result = sqlx::query(
            "INSERT INTO devices (core_id, name, registrar, ip, product_id, firmware_version, group_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(device.core_id)
        .bind(device.name)
        .bind(device.registrar)
        .bind(device.ip)
        .bind(device.product_id)
        .bind(device.firmware_version)
        .bind(device.group_id)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_device(result.last_insert_rowid()).await
    }

    /// Get a device by its store id.
    pub async fn get_device(&self, id: i64) -> Result<Device, DatabaseError> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Device {id}")))
    }

    /// Get a device by core id.
    pub async fn get_device_by_core_id(
        &self,
        core_id: &str,
    ) -> Result<Option<Device>, DatabaseError> {
        let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE core_id = ?")
            .bind(core_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(device)
    }

    /// List every device.
    pub async fn list_devices(&self) -> Result<Vec<Device>, DatabaseError> {
        let devices = sqlx::query_as::<_, Device>("SELECT * FROM devices ORDER BY id")
            .fetch_all(self.pool())
            .await?;

        Ok(devices)
    }

    /// Overwrite the mutable columns of a device. `created_at` is never touched.
    pub async fn update_device_row(
        &self,
        id: i64,
        device: &DeviceParams<'_>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE devices SET core_id = ?, name = ?, registrar = ?, ip = ?, product_id = ?, firmware_version = ?, group_id = ? WHERE id = ?",
        )
        .bind(device.core_id)
        .bind(device.name)
        .bind(device.registrar)
        .bind(device.ip)
        .bind(device.product_id)
        .bind(device.firmware_version)
        .bind(device.group_id)
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Device key queries
    // =========================================================================

    /// Get the key row of a device.
    pub async fn get_device_key(&self, core_id: &str) -> Result<Option<DeviceKey>, DatabaseError> {
        let key = sqlx::query_as::<_, DeviceKey>("SELECT * FROM device_keys WHERE core_id = ?")
            .bind(core_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(key)
    }

    /// Create or replace a device public key, keeping any pending claim code.
    pub async fn set_device_public_key(
        &self,
        core_id: &str,
        public_key: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO device_keys (core_id, public_key, claim_code, updated_at) VALUES (?, ?, NULL, ?)
             ON CONFLICT(core_id) DO UPDATE SET public_key = excluded.public_key, updated_at = excluded.updated_at",
        )
        .bind(core_id)
        .bind(public_key)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Store a claim: registrar on the device row (if any) and claim code on
    /// the key row, atomically.
    pub async fn record_claim(
        &self,
        core_id: &str,
        claim_code: &str,
        registrar: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        if let Some(registrar) = registrar {
            sqlx::query("UPDATE devices SET registrar = ? WHERE core_id = ?")
                .bind(registrar)
                .bind(core_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO device_keys (core_id, public_key, claim_code, updated_at) VALUES (?, '', ?, ?)
             ON CONFLICT(core_id) DO UPDATE SET claim_code = excluded.claim_code, updated_at = excluded.updated_at",
        )
        .bind(core_id)
        .bind(claim_code)
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Clear a claim code if it matches. Returns whether it was cleared.
    pub async fn clear_claim_code(
        &self,
        core_id: &str,
        claim_code: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE device_keys SET claim_code = NULL, updated_at = ? WHERE core_id = ? AND claim_code = ?",
        )
        .bind(unix_timestamp())
        .bind(core_id)
        .bind(claim_code)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // User queries
    // =========================================================================

    /// Create a user. Users are owned by the account service; this exists for
    /// provisioning and tests.
    pub async fn create_user(
        &self,
        id: &str,
        username: &str,
        claim_code: Option<&str>,
    ) -> Result<User, DatabaseError> {
        sqlx::query("INSERT INTO users (id, username, claim_code, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(username)
            .bind(claim_code)
            .bind(unix_timestamp())
            .execute(self.pool())
            .await?;

        self.get_user(id).await
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: &str) -> Result<User, DatabaseError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("User {id}")))
    }

    /// Find the user whose claim code is `claim_code`.
    pub async fn get_user_by_claim_code(
        &self,
        claim_code: &str,
    ) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE claim_code = ?")
            .bind(claim_code)
            .fetch_optional(self.pool())
            .await?;

        Ok(user)
    }
}
