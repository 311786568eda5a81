pub mod memory;

use anyhow::Result;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

pub const MASTER_KEY_LEN: usize = 32;

/// Argon2id cost parameters, persisted next to whatever they protect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

pub fn generate_master_key() -> [u8; MASTER_KEY_LEN] {
    let mut key = [0u8; MASTER_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn derive_key_material(secret: &[u8], salt: &[u8], kdf: KdfParams) -> Result<[u8; 32]> {
    let mut output = [0u8; 32];
    let mut secret_bytes = secret.to_vec();

    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, None)
        .map_err(|err| anyhow::anyhow!("Invalid Argon2 params: {err}"))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let result = argon2
        .hash_password_into(&secret_bytes, salt, &mut output)
        .map_err(|err| anyhow::anyhow!("Argon2 error: {err}"));
    secret_bytes.zeroize();
    result?;
    Ok(output)
}

pub fn hex_encode(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(LUT[(b >> 4) as usize] as char);
        out.push(LUT[(b & 0x0f) as usize] as char);
    }
    out
}

/// Inverse of [`hex_encode`]; `None` on odd length or a non-hex digit.
pub fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfParams {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0x0f, 0xa5, 0xff]), "000fa5ff");
    }

    #[test]
    fn test_hex_decode_rejects_garbage() {
        assert_eq!(hex_decode("000fA5ff"), Some(vec![0x00, 0x0f, 0xa5, 0xff]));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
    }

    #[test]
    fn test_derivation_is_deterministic_per_salt() {
        let a = derive_key_material(b"hunter2", b"0123456789abcdef", cheap()).unwrap();
        let b = derive_key_material(b"hunter2", b"0123456789abcdef", cheap()).unwrap();
        let c = derive_key_material(b"hunter2", b"fedcba9876543210", cheap()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_master_keys_differ() {
        assert_ne!(generate_master_key(), generate_master_key());
    }
}
