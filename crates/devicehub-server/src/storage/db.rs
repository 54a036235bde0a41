//! `SQLite` database for the device server.

devicehub_core::define_database!(DeviceDatabase, "Device database migrations complete");
