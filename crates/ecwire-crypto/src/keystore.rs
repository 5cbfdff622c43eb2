//! Pluggable storage for key material.
//!
//! Nothing in the handshake writes to a fixed path. A [`KeyStore`] is
//! handed in by the caller: [`FileKeyStore`] for a protected directory,
//! [`MemoryKeyStore`] for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keypair::{EphemeralKeyPair, PublicKeyMaterial};

/// Storage capability for named blobs of key material.
pub trait KeyStore: Send + Sync {
    /// Store `bytes` under `name`, replacing any previous entry.
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), CryptoError>;

    /// Load the entry stored under `name`.
    fn load(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

fn validate_name(name: &str) -> Result<(), CryptoError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(CryptoError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid key store entry name: {name:?}"),
        )))
    }
}

/// Stores each entry as a file in one directory.
///
/// Files are created owner-only (0600) on Unix, and loading refuses
/// files that are readable by anyone else.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, CryptoError> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }
}

impl KeyStore for FileKeyStore {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), CryptoError> {
        let path = self.entry_path(name)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, bytes)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "key material written");
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let path = self.entry_path(name)?;
        if !path.exists() {
            return Err(CryptoError::KeyNotFound(name.to_string()));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path)?.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CryptoError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("Key file has insecure permissions: {mode:o} (expected 600)"),
                )));
            }
        }

        Ok(Zeroizing::new(std::fs::read(&path)?))
    }
}

/// Process-local store, never touches the filesystem.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all stored entries, sorted.
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = entries.keys().cloned().collect();
        names.sort();
        names
    }
}

impl KeyStore for MemoryKeyStore {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<(), CryptoError> {
        validate_name(name)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Zeroizing::new(bytes.to_vec()));
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CryptoError::KeyNotFound(name.to_string()))
    }
}

/// Entry name for a private key PEM, e.g. `server_private_key.pem`.
pub fn private_key_entry(prefix: &str) -> String {
    format!("{prefix}_private_key.pem")
}

/// Entry name for a public key PEM, e.g. `client_public_key.pem`.
pub fn public_key_entry(prefix: &str) -> String {
    format!("{prefix}_public_key.pem")
}

/// Persist both halves of a keypair as PEM under `prefix`.
pub fn save_keypair(
    store: &dyn KeyStore,
    prefix: &str,
    keypair: &EphemeralKeyPair,
) -> Result<(), CryptoError> {
    let private_pem = keypair.to_private_pem()?;
    store.save(&private_key_entry(prefix), private_pem.as_bytes())?;
    let public_pem = keypair.public_material().to_pem()?;
    store.save(&public_key_entry(prefix), public_pem.as_bytes())
}

/// Load a keypair previously written by [`save_keypair`].
pub fn load_keypair(store: &dyn KeyStore, prefix: &str) -> Result<EphemeralKeyPair, CryptoError> {
    let bytes = store.load(&private_key_entry(prefix))?;
    let pem = std::str::from_utf8(&bytes)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    EphemeralKeyPair::from_private_pem(pem)
}

/// Load a public key previously written by [`save_keypair`].
pub fn load_public_key(
    store: &dyn KeyStore,
    prefix: &str,
) -> Result<PublicKeyMaterial, CryptoError> {
    let bytes = store.load(&public_key_entry(prefix))?;
    let pem = std::str::from_utf8(&bytes)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    PublicKeyMaterial::from_pem(pem)
}
