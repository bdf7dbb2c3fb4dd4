//! AEAD sealing of arbitrary buffers under the data key
//!
//! Sealed format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! The caller supplies the AAD; the archive binds item headers to their
//! 2-byte length prefix and body chunks to their 8-byte frame header, which
//! prevents frame reordering and length-truncation splices.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use cryptar_core::{CryptarError, CryptarResult};

use crate::keys::DataKey;
use crate::{NONCE_SIZE, OVERHEAD};

/// AEAD wrapper around the archive's data key.
pub struct CipherBox {
    aead: XChaCha20Poly1305,
}

impl CipherBox {
    pub fn new(data_key: &DataKey) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(data_key.as_bytes().into()),
        }
    }

    /// Seal `plaintext` with a fresh random nonce, binding `aad`.
    ///
    /// Output is `nonce || ciphertext || tag`, exactly [`OVERHEAD`] bytes
    /// longer than the input.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> CryptarResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .aead
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| anyhow::anyhow!("sealing failed: {e}"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open a sealed buffer, verifying `aad`. Any mismatch (wrong key,
    /// flipped bit, wrong AAD, truncation) is [`CryptarError::Auth`].
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> CryptarResult<Vec<u8>> {
        if sealed.len() < OVERHEAD {
            return Err(CryptarError::Auth);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);

        self.aead
            .decrypt(
                XNonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptarError::Auth)
    }
}
