//! The fixed-size plaintext archive preamble
//!
//! ```text
//! [magic: 4][version: 1][compression: 1][chunk size: 8 LE]
//! [kdf salt: 16][key nonce: 24][wrapped data key: 48]
//! ```
//!
//! Deliberately unencrypted: a reader needs the salt and the wrapped key
//! before it has any key material. Everything here except the key fields is
//! written once at creation; password rotation overwrites salt, nonce, and
//! wrapped key in place.

use std::io::{self, Read, Write};

use cryptar_core::{CryptarError, CryptarResult};
use cryptar_crypto::{NONCE_SIZE, SALT_SIZE, WRAPPED_KEY_SIZE};

pub const MAGIC: [u8; 4] = [0x01, 0x03, 0x03, 0x07];
pub const VERSION: u8 = 1;

/// Serialized preamble length: magic, version, compression flag, chunk size,
/// KDF salt, key nonce, wrapped data key.
pub const HEADER_LEN: usize = 4 + 1 + 1 + 8 + SALT_SIZE + NONCE_SIZE + WRAPPED_KEY_SIZE;

#[derive(Clone)]
pub struct ArchiveHeader {
    pub version: u8,
    pub compression: bool,
    pub chunk_size: u64,
    pub kdf_salt: [u8; SALT_SIZE],
    pub key_nonce: [u8; NONCE_SIZE],
    pub wrapped_key: [u8; WRAPPED_KEY_SIZE],
}

impl ArchiveHeader {
    pub fn write(&self, dest: &mut impl Write) -> CryptarResult<()> {
        let mut buf = [0u8; HEADER_LEN];
        let mut at = 0;

        buf[at..at + 4].copy_from_slice(&MAGIC);
        at += 4;
        buf[at] = self.version;
        at += 1;
        buf[at] = u8::from(self.compression);
        at += 1;
        buf[at..at + 8].copy_from_slice(&self.chunk_size.to_le_bytes());
        at += 8;
        buf[at..at + SALT_SIZE].copy_from_slice(&self.kdf_salt);
        at += SALT_SIZE;
        buf[at..at + NONCE_SIZE].copy_from_slice(&self.key_nonce);
        at += NONCE_SIZE;
        buf[at..at + WRAPPED_KEY_SIZE].copy_from_slice(&self.wrapped_key);

        dest.write_all(&buf)?;
        Ok(())
    }

    pub fn read(src: &mut impl Read) -> CryptarResult<Self> {
        let mut buf = [0u8; HEADER_LEN];
        src.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                CryptarError::InvalidFormat("archive preamble truncated")
            } else {
                CryptarError::Io(e)
            }
        })?;

        if buf[..4] != MAGIC {
            return Err(CryptarError::InvalidFormat("bad magic number"));
        }

        let version = buf[4];
        if version != VERSION {
            return Err(CryptarError::InvalidFormat("unsupported archive version"));
        }

        let compression = buf[5] != 0;

        let mut at = 6;
        let chunk_size = u64::from_le_bytes(buf[at..at + 8].try_into().expect("fixed slice"));
        at += 8;

        let mut kdf_salt = [0u8; SALT_SIZE];
        kdf_salt.copy_from_slice(&buf[at..at + SALT_SIZE]);
        at += SALT_SIZE;

        let mut key_nonce = [0u8; NONCE_SIZE];
        key_nonce.copy_from_slice(&buf[at..at + NONCE_SIZE]);
        at += NONCE_SIZE;

        let mut wrapped_key = [0u8; WRAPPED_KEY_SIZE];
        wrapped_key.copy_from_slice(&buf[at..at + WRAPPED_KEY_SIZE]);

        Ok(Self {
            version,
            compression,
            chunk_size,
            kdf_salt,
            key_nonce,
            wrapped_key,
        })
    }
}
