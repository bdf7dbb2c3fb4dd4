//! cryptar-crypto: the key hierarchy and sealing primitives of the archive format
//!
//! ```text
//! Password (Argon2id, salt stored in the archive preamble)
//!   └── KEK (256-bit, never written anywhere)
//!         └── wraps the Data Key (256-bit random, stored sealed in the preamble)
//!               └── seals every item header and body chunk
//!                   (XChaCha20-Poly1305, fresh random 192-bit nonce, caller AAD)
//! ```
//!
//! All nonces are random; at 192 bits the collision probability is negligible
//! for any realistic archive size, so no nonce counter is persisted.

pub mod cipher;
pub mod kdf;
pub mod keys;

pub use cipher::CipherBox;
pub use kdf::Kek;
pub use keys::{unwrap_data_key, wrap_data_key, DataKey};

/// Size of the KEK and the data key (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the KDF salt stored in the archive preamble
pub const SALT_SIZE: usize = 16;

/// Sealing overhead: prefixed nonce plus authentication tag.
pub const OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// On-disk size of the wrapped data key: ciphertext plus tag. The wrapping
/// nonce lives in its own preamble field, so it is not part of this blob.
pub const WRAPPED_KEY_SIZE: usize = KEY_SIZE + TAG_SIZE;
