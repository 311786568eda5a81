//! Where the database key comes from.
//!
//! The store never derives or rotates its own key: whoever opens it hands in a
//! [`DatabaseSecret`] obtained from a [`SecretProvider`], and that secret is
//! passed through to SQLCipher unmodified.

use anyhow::{anyhow, Result};
use log::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keystore::Keystore;
use crate::paths::StorePaths;
use crate::security::memory::SecurePassword;
use crate::security::{self, KdfParams, MASTER_KEY_LEN};

/// Opaque key bytes for the encrypted store.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DatabaseSecret {
    bytes: Vec<u8>,
}

impl DatabaseSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SQLCipher passphrase form of the key.
    pub fn as_passphrase(&self) -> String {
        security::hex_encode(&self.bytes)
    }
}

impl std::fmt::Debug for DatabaseSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DatabaseSecret(****)")
    }
}

pub trait SecretProvider {
    fn database_secret(&self) -> Result<DatabaseSecret>;
}

/// A key the caller already holds.
pub struct FixedSecretProvider {
    secret: DatabaseSecret,
}

impl FixedSecretProvider {
    pub fn new(secret: DatabaseSecret) -> Self {
        Self { secret }
    }
}

impl SecretProvider for FixedSecretProvider {
    fn database_secret(&self) -> Result<DatabaseSecret> {
        Ok(self.secret.clone())
    }
}

/// Unwraps the master key from `keystore.json` with a password, creating the
/// keystore on first use when no database exists yet.
pub struct KeystoreSecretProvider<'a> {
    paths: &'a StorePaths,
    password: SecurePassword,
    kdf: KdfParams,
}

impl<'a> KeystoreSecretProvider<'a> {
    pub fn new(paths: &'a StorePaths, password: SecurePassword) -> Self {
        Self {
            paths,
            password,
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }
}

impl SecretProvider for KeystoreSecretProvider<'_> {
    fn database_secret(&self) -> Result<DatabaseSecret> {
        if self.password.is_empty() {
            return Err(anyhow!("An empty password cannot unlock the store"));
        }

        let mut master_key: [u8; MASTER_KEY_LEN] = if self.paths.keystore_path().exists() {
            Keystore::load(self.paths.keystore_path())?.unwrap_with_password(self.password.as_bytes())?
        } else {
            if self.paths.db_path.exists() {
                return Err(anyhow!(
                    "Keystore missing but {} exists; the store cannot be unlocked",
                    self.paths.db_path.display()
                ));
            }
            self.paths.ensure_base_dir()?;
            let (keystore, master_key) = Keystore::create_new(self.password.as_bytes(), self.kdf)?;
            keystore.save(self.paths.keystore_path())?;
            info!("Created keystore at {}", self.paths.keystore_path().display());
            master_key
        };

        let secret = DatabaseSecret::new(master_key.to_vec());
        master_key.zeroize();
        Ok(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_passphrase_is_hex() {
        let secret = DatabaseSecret::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(secret.as_passphrase(), "deadbeef");
        assert_eq!(format!("{secret:?}"), "DatabaseSecret(****)");
    }

    #[test]
    fn test_keystore_provider_is_stable_across_unlocks() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::in_dir(temp.path().to_path_buf());

        let first = KeystoreSecretProvider::new(&paths, SecurePassword::from("pw"))
            .with_kdf(cheap())
            .database_secret()
            .unwrap();
        let second = KeystoreSecretProvider::new(&paths, SecurePassword::from("pw"))
            .with_kdf(cheap())
            .database_secret()
            .unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.as_bytes().len(), MASTER_KEY_LEN);
    }

    #[test]
    fn test_keystore_provider_refuses_orphaned_database() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::in_dir(temp.path().to_path_buf());
        std::fs::write(&paths.db_path, b"not really a database").unwrap();

        let err = KeystoreSecretProvider::new(&paths, SecurePassword::from("pw"))
            .with_kdf(cheap())
            .database_secret()
            .unwrap_err();
        assert!(err.to_string().contains("Keystore missing"));
    }

    #[test]
    fn test_empty_password_rejected() {
        let temp = tempdir().unwrap();
        let paths = StorePaths::in_dir(temp.path().to_path_buf());
        assert!(KeystoreSecretProvider::new(&paths, SecurePassword::from(""))
            .database_secret()
            .is_err());
    }
}
