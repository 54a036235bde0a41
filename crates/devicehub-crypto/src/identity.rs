//! Server identity provisioning.
//!
//! The presence of the private key file is the only signal that provisioning
//! already happened. An existing file is never regenerated or overwritten.

use std::path::{Path, PathBuf};

use rcgen::{KeyPair, PublicKeyData};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::IdentityError;

/// Result of [`ensure_server_identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// A new key pair was generated and written.
    Generated,
    /// A private key was already present; nothing was touched.
    Existing,
}

/// Path of the public key belonging to the private key at `private_key`.
///
/// The last extension is replaced with `.pub.pem`, so `default_key.pem`
/// maps to `default_key.pub.pem`.
pub fn public_key_path(private_key: &Path) -> PathBuf {
    private_key.with_extension("pub.pem")
}

/// Make sure a server key pair exists at `path`.
///
/// When no file exists at `path`, a fresh key pair is generated, the public
/// key is written to [`public_key_path`] and the private key to `path`
/// (owner-only permissions on Unix). The public key goes first so a crash
/// between the two writes never leaves a private key without its public half.
pub fn ensure_server_identity(path: &Path) -> Result<Provisioned, IdentityError> {
    if path.exists() {
        return Ok(Provisioned::Existing);
    }

    warn!(path = %path.display(), "Creating NEW server key");

    let key_pair = KeyPair::generate().map_err(|e| IdentityError::Generation(e.to_string()))?;

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let pub_path = public_key_path(path);
    std::fs::write(&pub_path, key_pair.public_key_pem())?;
    std::fs::write(path, key_pair.serialize_pem())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!(
        private_key = %path.display(),
        public_key = %pub_path.display(),
        fingerprint = %fingerprint_of(&key_pair.subject_public_key_info()),
        "Server identity provisioned"
    );

    Ok(Provisioned::Generated)
}

/// Read the private key at `path` and return the fingerprint of its public
/// half.
pub fn server_fingerprint(path: &Path) -> Result<String, IdentityError> {
    let pem = std::fs::read_to_string(path)?;
    let key_pair = KeyPair::from_pem(&pem).map_err(|e| IdentityError::InvalidKey(e.to_string()))?;
    Ok(fingerprint_of(&key_pair.subject_public_key_info()))
}

/// Compute a colon-separated SHA-256 hex fingerprint of DER public key bytes.
pub fn fingerprint_of(public_key_der: &[u8]) -> String {
    let hash = Sha256::digest(public_key_der);
    hash.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn public_key_path_replaces_extension() {
        assert_eq!(
            public_key_path(Path::new("/etc/devicehub/default_key.pem")),
            PathBuf::from("/etc/devicehub/default_key.pub.pem")
        );
        assert_eq!(
            public_key_path(Path::new("server")),
            PathBuf::from("server.pub.pem")
        );
    }

    #[test]
    fn generates_both_files_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("default_key.pem");

        assert_eq!(ensure_server_identity(&path).unwrap(), Provisioned::Generated);

        let private = std::fs::read_to_string(&path).unwrap();
        let public = std::fs::read_to_string(public_key_path(&path)).unwrap();
        assert!(private.contains("BEGIN PRIVATE KEY"));
        assert!(public.contains("BEGIN PUBLIC KEY"));
    }

    #[test]
    fn second_call_leaves_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default_key.pem");

        ensure_server_identity(&path).unwrap();
        let private = std::fs::read(&path).unwrap();
        let public = std::fs::read(public_key_path(&path)).unwrap();

        assert_eq!(ensure_server_identity(&path).unwrap(), Provisioned::Existing);
        assert_eq!(std::fs::read(&path).unwrap(), private);
        assert_eq!(std::fs::read(public_key_path(&path)).unwrap(), public);
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default_key.pem");
        std::fs::write(&path, "operator supplied").unwrap();

        assert_eq!(ensure_server_identity(&path).unwrap(), Provisioned::Existing);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "operator supplied");
        assert!(!public_key_path(&path).exists());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default_key.pem");
        ensure_server_identity(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();

        let result = ensure_server_identity(&blocker.join("default_key.pem"));
        assert!(matches!(result, Err(IdentityError::IoError(_))));
    }

    #[test]
    fn fingerprint_is_stable_for_the_provisioned_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default_key.pem");
        ensure_server_identity(&path).unwrap();

        let first = server_fingerprint(&path).unwrap();
        let second = server_fingerprint(&path).unwrap();
        assert_eq!(first, second);
        // 32 bytes, two hex chars each, 31 separators
        assert_eq!(first.len(), 32 * 2 + 31);
    }

    #[test]
    fn distinct_keys_have_distinct_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.pem");
        let second = dir.path().join("b.pem");
        ensure_server_identity(&first).unwrap();
        ensure_server_identity(&second).unwrap();

        let key = KeyPair::from_pem(&std::fs::read_to_string(&first).unwrap()).unwrap();
        assert_eq!(
            server_fingerprint(&first).unwrap(),
            fingerprint_of(&key.subject_public_key_info())
        );
        assert_ne!(
            server_fingerprint(&first).unwrap(),
            server_fingerprint(&second).unwrap()
        );
    }

    #[test]
    fn fingerprint_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default_key.pem");
        std::fs::write(&path, "not a key").unwrap();

        assert!(matches!(
            server_fingerprint(&path),
            Err(IdentityError::InvalidKey(_))
        ));
    }
}
