//! `DeviceHub` server identity.
//!
//! The device server needs an asymmetric key pair on disk before it accepts
//! any connection. This crate provisions that pair exactly once and exposes
//! helpers to locate and fingerprint it.
//!
//! Keys are ECDSA P-256, generated and PEM-encoded by `rcgen`.

pub mod error;
pub mod identity;

pub use error::IdentityError;
pub use identity::{
    Provisioned, ensure_server_identity, fingerprint_of, public_key_path, server_fingerprint,
};
