//! Stateless zstd transform for body chunks
//!
//! No framing is added here; the body frame around each chunk carries the
//! sealed length, so plain `encode_all`/`decode_all` round-trips suffice.

use cryptar_core::CryptarResult;

pub fn compress(data: &[u8]) -> CryptarResult<Vec<u8>> {
    Ok(zstd::encode_all(data, zstd::DEFAULT_COMPRESSION_LEVEL)?)
}

pub fn decompress(data: &[u8]) -> CryptarResult<Vec<u8>> {
    Ok(zstd::decode_all(data)?)
}
