//! Cached device attributes.

use serde::Serialize;

use super::CoreId;
use crate::storage::{Device, DeviceParams};

/// The registry's view of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub core_id: CoreId,
    /// Store-assigned id; `None` until the device has been persisted.
    pub internal_id: Option<i64>,
    pub name: Option<String>,
    pub registrar: Option<String>,
    pub ip: Option<String>,
    pub product_id: Option<i64>,
    pub firmware_version: Option<i64>,
    /// `None` until set or loaded; stored as group 0. See [`Self::group`].
    pub group_id: Option<i64>,
    /// Unix seconds, set by the store on insert.
    pub created_at: Option<i64>,
}

impl DeviceRecord {
    /// An empty entry for a device nothing is known about yet.
    pub const fn placeholder(core_id: CoreId) -> Self {
        Self {
            core_id,
            internal_id: None,
            name: None,
            registrar: None,
            ip: None,
            product_id: None,
            firmware_version: None,
            group_id: None,
            created_at: None,
        }
    }

    /// Normalise a store row into the cache shape.
    pub fn from_row(core_id: CoreId, row: Device) -> Self {
        Self {
            core_id,
            internal_id: Some(row.id),
            name: row.name,
            registrar: row.registrar,
            ip: row.ip,
            product_id: row.product_id,
            firmware_version: row.firmware_version,
            group_id: Some(row.group_id),
            created_at: Some(row.created_at),
        }
    }

    /// Take the store identity from `row` and fill every attribute the cache
    /// does not know yet. Attributes the cache already holds win.
    pub fn backfill(&mut self, row: Device) {
        fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
            if slot.is_none() {
                *slot = value;
            }
        }

        self.internal_id = Some(row.id);
        self.created_at = Some(row.created_at);
        fill(&mut self.name, row.name);
        fill(&mut self.registrar, row.registrar);
        fill(&mut self.ip, row.ip);
        fill(&mut self.product_id, row.product_id);
        fill(&mut self.firmware_version, row.firmware_version);
        fill(&mut self.group_id, Some(row.group_id));
    }

    /// Effective group; an unset group is group 0.
    pub fn group(&self) -> i64 {
        self.group_id.unwrap_or(0)
    }

    /// Column values for a store write.
    pub fn as_params(&self) -> DeviceParams<'_> {
        DeviceParams {
            core_id: self.core_id.as_str(),
            name: self.name.as_deref(),
            registrar: self.registrar.as_deref(),
            ip: self.ip.as_deref(),
            product_id: self.product_id,
            firmware_version: self.firmware_version,
            group_id: self.group(),
        }
    }

    /// Apply one attribute. Returns whether the record changed.
    pub fn apply(&mut self, attribute: DeviceAttribute) -> bool {
        fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
            if *slot == value {
                false
            } else {
                *slot = value;
                true
            }
        }

        match attribute {
            DeviceAttribute::Name(v) => replace(&mut self.name, v),
            DeviceAttribute::Registrar(v) => replace(&mut self.registrar, v),
            DeviceAttribute::Ip(v) => replace(&mut self.ip, v),
            DeviceAttribute::ProductId(v) => replace(&mut self.product_id, v),
            DeviceAttribute::FirmwareVersion(v) => replace(&mut self.firmware_version, v),
            DeviceAttribute::GroupId(v) => replace(&mut self.group_id, Some(v)),
        }
    }
}

/// A settable device attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAttribute {
    Name(Option<String>),
    Registrar(Option<String>),
    Ip(Option<String>),
    ProductId(Option<i64>),
    FirmwareVersion(Option<i64>),
    GroupId(i64),
}
