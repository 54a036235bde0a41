//! `DeviceHub` Device Server Library
//!
//! Core functionality for the device server:
//! - In-memory registry of device attributes and live sessions
//! - Write-back of registry changes to `SQLite`
//! - Connection lifecycle driven by a pluggable protocol engine
//! - Claim codes binding devices to users
//! - Connectivity status events

pub mod claim;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_helpers;
