use serde::{Deserialize, Serialize};

use crate::error::{CryptarError, CryptarResult};

/// Default plaintext bytes per body chunk (4 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Smallest accepted chunk size (64 KiB).
pub const MIN_CHUNK_SIZE: u64 = 64 * 1024;

/// Largest accepted chunk size (1 GiB). The body frame records its sealed
/// length in a 32-bit field, so chunks must stay far below that ceiling.
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Archive parameters chosen at creation time.
///
/// Both fields are baked into the archive preamble; opening an existing
/// archive replaces caller-supplied options with the on-disk values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// Compress each chunk with zstd before sealing
    pub compression: bool,
    /// Plaintext bytes per body chunk
    pub chunk_size: u64,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            compression: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ArchiveOptions {
    pub fn validate(&self) -> CryptarResult<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(CryptarError::Config(format!(
                "chunk size {} below minimum of {} bytes",
                self.chunk_size, MIN_CHUNK_SIZE
            )));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(CryptarError::Config(format!(
                "chunk size {} above maximum of {} bytes",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_options() {
        let toml_str = r#"
compression = true
chunk_size = 1048576
"#;
        let opts: ArchiveOptions = toml::from_str(toml_str).unwrap();
        assert!(opts.compression);
        assert_eq!(opts.chunk_size, 1024 * 1024);
        opts.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let opts: ArchiveOptions = toml::from_str("").unwrap();
        assert!(!opts.compression);
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_parse_partial() {
        let opts: ArchiveOptions = toml::from_str("compression = true").unwrap();
        assert!(opts.compression);
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_chunk_size_lower_bound() {
        let opts = ArchiveOptions {
            compression: false,
            chunk_size: 1024,
        };
        assert!(matches!(
            opts.validate(),
            Err(CryptarError::Config(_))
        ));
    }

    #[test]
    fn test_chunk_size_upper_bound() {
        let opts = ArchiveOptions {
            compression: false,
            chunk_size: MAX_CHUNK_SIZE + 1,
        };
        assert!(matches!(
            opts.validate(),
            Err(CryptarError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let opts = ArchiveOptions::default();
        let toml_str = toml::to_string(&opts).unwrap();
        let parsed: ArchiveOptions = toml::from_str(&toml_str).unwrap();
        assert_eq!(opts.compression, parsed.compression);
        assert_eq!(opts.chunk_size, parsed.chunk_size);
    }
}
