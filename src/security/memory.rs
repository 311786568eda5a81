use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secure password type - wrapper for Vec<u8> with zeroization
#[derive(Clone)]
pub struct SecurePassword {
    bytes: Vec<u8>,
}

impl Zeroize for SecurePassword {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for SecurePassword {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl ZeroizeOnDrop for SecurePassword {}

impl SecurePassword {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Reads the password from an environment variable, clearing the copy
    /// `std::env` handed out.
    pub fn from_env(var: &str) -> Option<Self> {
        let mut value = std::env::var(var).ok()?;
        let password = Self::new(value.as_bytes().to_vec());
        value.zeroize();
        Some(password)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for SecurePassword {
    fn from(password: &str) -> Self {
        Self::new(password.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for SecurePassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecurePassword(****)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_never_prints_contents() {
        let password = SecurePassword::from("correct horse");
        assert_eq!(format!("{password:?}"), "SecurePassword(****)");
    }

    #[test]
    fn test_zeroize_clears_bytes() {
        let mut password = SecurePassword::from("correct horse");
        password.zeroize();
        assert!(password.is_empty());
    }
}
