//! `SQLite` storage for the device server.
//!
//! Provides persistence for devices, device keys, and the user lookup used by
//! claims, plus the [`DeviceStore`] / [`UserDirectory`] traits the registry
//! talks to.

mod db;
mod gateway;
mod models;
mod queries;

#[cfg(test)]
mod tests;

pub use db::DeviceDatabase;
pub use devicehub_core::db::DatabaseError;
pub use gateway::{DeviceStore, UserDirectory};
pub use models::*;
