//! Data key generation and wrapping under the KEK
//!
//! The wrapped blob on disk is `ciphertext || tag` (48 bytes); the wrapping
//! nonce is stored in its own archive-preamble field and passed in here. The
//! data key is generated exactly once per archive and survives password
//! rotation unchanged, so re-wrapping never touches item ciphertexts.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use cryptar_core::{CryptarError, CryptarResult};

use crate::kdf::Kek;
use crate::{KEY_SIZE, NONCE_SIZE, WRAPPED_KEY_SIZE};

/// The archive's 256-bit data key. Zeroized on drop.
#[derive(Clone)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    /// Generate a fresh random data key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Wrap (encrypt) the data key under the KEK with the given nonce.
///
/// Empty AAD: the blob is bound to the archive solely through the preamble
/// fields it sits next to.
pub fn wrap_data_key(
    kek: &Kek,
    nonce: &[u8; NONCE_SIZE],
    data_key: &DataKey,
) -> CryptarResult<[u8; WRAPPED_KEY_SIZE]> {
    let cipher = XChaCha20Poly1305::new(kek.as_bytes().into());

    let mut ciphertext = cipher
        .encrypt(XNonce::from_slice(nonce), data_key.as_bytes().as_ref())
        .map_err(|e| anyhow::anyhow!("key wrapping failed: {e}"))?;

    let mut wrapped = [0u8; WRAPPED_KEY_SIZE];
    wrapped.copy_from_slice(&ciphertext);
    ciphertext.zeroize();
    Ok(wrapped)
}

/// Unwrap (decrypt) the data key. Failure means the password was wrong or
/// the preamble was tampered with; both surface as [`CryptarError::WrongPassword`].
pub fn unwrap_data_key(
    kek: &Kek,
    nonce: &[u8; NONCE_SIZE],
    wrapped: &[u8; WRAPPED_KEY_SIZE],
) -> CryptarResult<DataKey> {
    let cipher = XChaCha20Poly1305::new(kek.as_bytes().into());

    let mut plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), wrapped.as_ref())
        .map_err(|_| CryptarError::WrongPassword)?;

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(DataKey::from_bytes(bytes))
}
