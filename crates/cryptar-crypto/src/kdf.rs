//! Key derivation: Argon2id password → KEK
//!
//! The parameters are fixed by the archive format: changing them would make
//! existing archives unreadable, so they are consts rather than configuration.

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use cryptar_core::CryptarResult;

use crate::{KEY_SIZE, SALT_SIZE};

const KDF_TIME_COST: u32 = 1;
const KDF_MEM_COST_KIB: u32 = 64 * 1024;
const KDF_PARALLELISM: u32 = 4;

/// The key-encryption key derived from the archive password.
///
/// Only ever used to wrap and unwrap the data key. Zeroized on drop so the
/// derived secret does not linger in memory.
pub struct Kek {
    bytes: [u8; KEY_SIZE],
}

impl Kek {
    /// Derive the KEK from a password and the archive's stored salt.
    pub fn derive(password: &SecretString, salt: &[u8; SALT_SIZE]) -> CryptarResult<Self> {
        let params = Params::new(
            KDF_MEM_COST_KIB,
            KDF_TIME_COST,
            KDF_PARALLELISM,
            Some(KEY_SIZE),
        )
        .map_err(|e| anyhow::anyhow!("invalid Argon2id params: {e}"))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut bytes = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(password.expose_secret().as_bytes(), salt, &mut bytes)
            .map_err(|e| anyhow::anyhow!("Argon2id KDF failed: {e}"))?;

        Ok(Self { bytes })
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("bytes", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("test-password-123");
        let salt = [1u8; SALT_SIZE];

        let k1 = Kek::derive(&password, &salt).unwrap();
        let k2 = Kek::derive(&password, &salt).unwrap();

        assert_eq!(k1.as_bytes(), k2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passwords() {
        let salt = [1u8; SALT_SIZE];

        let k1 = Kek::derive(&SecretString::from("password-a"), &salt).unwrap();
        let k2 = Kek::derive(&SecretString::from("password-b"), &salt).unwrap();

        assert_ne!(
            k1.as_bytes(),
            k2.as_bytes(),
            "different passwords must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");

        let k1 = Kek::derive(&password, &[1u8; SALT_SIZE]).unwrap();
        let k2 = Kek::derive(&password, &[2u8; SALT_SIZE]).unwrap();

        assert_ne!(
            k1.as_bytes(),
            k2.as_bytes(),
            "different salts must produce different keys"
        );
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let kek = Kek::derive(&SecretString::from("x"), &[0u8; SALT_SIZE]).unwrap();
        assert!(format!("{kek:?}").contains("REDACTED"));
    }
}
