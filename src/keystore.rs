use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use zeroize::Zeroize;

use crate::security::{self, KdfParams, MASTER_KEY_LEN};

const VERSION: u8 = 2;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;

/// On-disk envelope for the database master key. The key itself never touches
/// disk unwrapped.
#[derive(Debug, Serialize, Deserialize)]
pub struct Keystore {
    pub version: u8,
    pub kdf: KdfParams,
    pub salt: String,
    pub nonce: String,
    pub wrapped_master_key: String,
}

impl Keystore {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read keystore {}", path.display()))?;
        let store: Keystore = serde_json::from_str(&data)?;
        if store.version != VERSION {
            return Err(anyhow!("Unsupported keystore version {}", store.version));
        }
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn create_new(password: &[u8], kdf: KdfParams) -> Result<(Self, [u8; MASTER_KEY_LEN])> {
        let master_key = security::generate_master_key();
        let salt: [u8; SALT_LEN] = security::random_bytes();
        let nonce: [u8; NONCE_LEN] = security::random_bytes();

        let mut wrapped = wrap_master_key(password, &salt, &nonce, kdf, &master_key)?;

        let store = Keystore {
            version: VERSION,
            kdf,
            salt: STANDARD_NO_PAD.encode(salt),
            nonce: STANDARD_NO_PAD.encode(nonce),
            wrapped_master_key: STANDARD_NO_PAD.encode(&wrapped),
        };
        wrapped.zeroize();

        Ok((store, master_key))
    }

    pub fn unwrap_with_password(&self, password: &[u8]) -> Result<[u8; MASTER_KEY_LEN]> {
        let salt = decode_fixed(&self.salt, SALT_LEN, "salt")?;
        let nonce = decode_fixed(&self.nonce, NONCE_LEN, "nonce")?;
        let wrapped = STANDARD_NO_PAD
            .decode(&self.wrapped_master_key)
            .map_err(|_| anyhow!("Invalid wrapped key data"))?;

        let mut wrap_key = security::derive_key_material(password, &salt, self.kdf)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&wrap_key));
        let plaintext = cipher.decrypt(XNonce::from_slice(&nonce), wrapped.as_ref());
        wrap_key.zeroize();
        let mut plaintext = plaintext.map_err(|_| anyhow!("Invalid password"))?;

        if plaintext.len() != MASTER_KEY_LEN {
            plaintext.zeroize();
            return Err(anyhow!("Invalid master key length"));
        }

        let mut master_key = [0u8; MASTER_KEY_LEN];
        master_key.copy_from_slice(&plaintext);
        plaintext.zeroize();
        Ok(master_key)
    }
}

fn wrap_master_key(
    password: &[u8],
    salt: &[u8],
    nonce: &[u8],
    kdf: KdfParams,
    master_key: &[u8; MASTER_KEY_LEN],
) -> Result<Vec<u8>> {
    let mut wrap_key = security::derive_key_material(password, salt, kdf)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&wrap_key));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(nonce), master_key.as_ref())
        .map_err(|_| anyhow!("Failed to wrap master key"));
    wrap_key.zeroize();
    ciphertext
}

fn decode_fixed(encoded: &str, expected_len: usize, label: &str) -> Result<Vec<u8>> {
    let decoded = STANDARD_NO_PAD
        .decode(encoded)
        .map_err(|_| anyhow!("Invalid {label} encoding"))?;
    if decoded.len() != expected_len {
        return Err(anyhow!("Invalid {label} length"));
    }
    Ok(decoded)
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
    fn test_unwrap_with_correct_password() {
        let (store, master_key) = Keystore::create_new(b"open sesame", cheap()).unwrap();
        assert_eq!(store.unwrap_with_password(b"open sesame").unwrap(), master_key);
    }

    #[test]
    fn test_unwrap_with_wrong_password_fails() {
        let (store, _) = Keystore::create_new(b"open sesame", cheap()).unwrap();
        let err = store.unwrap_with_password(b"close sesame").unwrap_err();
        assert!(err.to_string().contains("Invalid password"));
    }

    #[test]
    fn test_save_and_load_preserves_kdf() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("keystore.json");
        let (store, master_key) = Keystore::create_new(b"pw", cheap()).unwrap();
        store.save(&path).unwrap();

        let loaded = Keystore::load(&path).unwrap();
        assert_eq!(loaded.kdf, cheap());
        assert_eq!(loaded.unwrap_with_password(b"pw").unwrap(), master_key);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("keystore.json");
        let (mut store, _) = Keystore::create_new(b"pw", cheap()).unwrap();
        store.version = 1;
        store.save(&path).unwrap();
        assert!(Keystore::load(&path).is_err());
    }
}
