//! Identity error types.

/// Errors from provisioning or reading the server identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Key generation failed: {0}")]
    Generation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
