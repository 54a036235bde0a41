//! Data models for device storage.

use serde::{Deserialize, Serialize};

/// A row of the `devices` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub core_id: String,
    pub name: Option<String>,
    pub registrar: Option<String>,
    pub ip: Option<String>,
    pub product_id: Option<i64>,
    pub firmware_version: Option<i64>,
    pub group_id: i64,
    pub created_at: i64,
}

/// A row of the `device_keys` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceKey {
    pub core_id: String,
    pub public_key: String,
    pub claim_code: Option<String>,
    pub updated_at: i64,
}

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub claim_code: Option<String>,
    pub created_at: i64,
}

/// Column values written by device inserts and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceParams<'a> {
    pub core_id: &'a str,
    pub name: Option<&'a str>,
    pub registrar: Option<&'a str>,
    pub ip: Option<&'a str>,
    pub product_id: Option<i64>,
    pub firmware_version: Option<i64>,
    pub group_id: i64,
}
