//! Encrypted per-entry metadata
//!
//! On disk an item header is `[sealed len: 2 LE][sealed bytes]`, where the
//! 2-byte length prefix is also the AAD of the seal. Sealed plaintext, in
//! declared order:
//! ```text
//! [path len: 2 LE][path bytes][size: 8 LE][chunks: 8 LE]
//! [mtime: 8 LE][mode: 4 LE][deleted: 1]
//! ```
//!
//! Re-sealing the same fields produces the same sealed length, which is what
//! makes in-place tombstoning possible: callers rewind by `len()` and write
//! a fresh seal over the old one.

use std::io::{self, Read, Write};

use serde::Serialize;

use cryptar_core::{CryptarError, CryptarResult};
use cryptar_crypto::{CipherBox, OVERHEAD};

const PATH_LEN_SIZE: usize = 2;
const SIZE_SIZE: usize = 8;
const CHUNKS_SIZE: usize = 8;
const MTIME_SIZE: usize = 8;
const MODE_SIZE: usize = 4;
const DELETED_SIZE: usize = 1;

const LEN_PREFIX_SIZE: usize = 2;

/// Fixed plaintext bytes of a header with an empty path.
const FIXED_FIELDS: usize =
    PATH_LEN_SIZE + SIZE_SIZE + CHUNKS_SIZE + MTIME_SIZE + MODE_SIZE + DELETED_SIZE;

/// Smallest sealed length that can possibly hold a header.
const MIN_SEALED_LEN: u16 = (FIXED_FIELDS + OVERHEAD) as u16;

/// Type bits of the `mode` field, Unix `st_mode` convention.
const MODE_TYPE_MASK: u32 = 0o170_000;
const MODE_DIR: u32 = 0o040_000;
const MODE_REGULAR: u32 = 0o100_000;

/// Entry classification derived from the mode bitfield.
///
/// Anything that is neither a regular file nor a directory is `Unknown` and
/// treated as regular for extraction purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Regular,
    Directory,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemHeader {
    /// Relative path, forward-slash separated, no leading `/`
    pub path: String,
    /// Plaintext byte length of the body (0 for directories)
    pub size: i64,
    /// Number of body frames following the header
    pub chunks: i64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
    /// File-mode bitfield, `st_mode` layout
    pub mode: u32,
    /// Tombstone flag
    pub deleted: bool,

    #[serde(skip)]
    sealed_len: u16,
}

impl ItemHeader {
    pub fn new(path: String, size: i64, chunks: i64, mtime: i64, mode: u32) -> Self {
        Self {
            path,
            size,
            chunks,
            mtime,
            mode,
            deleted: false,
            sealed_len: 0,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self.mode & MODE_TYPE_MASK {
            MODE_DIR => ItemKind::Directory,
            MODE_REGULAR => ItemKind::Regular,
            _ => ItemKind::Unknown,
        }
    }

    /// Build a directory/regular mode value for platforms without `st_mode`.
    pub fn synthesize_mode(is_dir: bool, permissions: u32) -> u32 {
        if is_dir {
            MODE_DIR | permissions
        } else {
            MODE_REGULAR | permissions
        }
    }

    /// Serialized on-disk length: prefix plus sealed bytes. Only meaningful
    /// after a `write` or `read`; callers use it to rewind and overwrite.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        (LEN_PREFIX_SIZE + self.sealed_len as usize) as u64
    }

    /// Serialize, seal, and emit the header. The 2-byte length prefix doubles
    /// as AAD so a header cannot be spliced behind a forged length.
    pub fn write(&mut self, dest: &mut impl Write, cipher: &CipherBox) -> CryptarResult<()> {
        if self.path.len() > u16::MAX as usize {
            return Err(CryptarError::InvalidPath(format!(
                "path longer than {} bytes",
                u16::MAX
            )));
        }

        let mut plain = Vec::with_capacity(FIXED_FIELDS + self.path.len());
        plain.extend_from_slice(&(self.path.len() as u16).to_le_bytes());
        plain.extend_from_slice(self.path.as_bytes());
        plain.extend_from_slice(&self.size.to_le_bytes());
        plain.extend_from_slice(&self.chunks.to_le_bytes());
        plain.extend_from_slice(&self.mtime.to_le_bytes());
        plain.extend_from_slice(&self.mode.to_le_bytes());
        plain.push(u8::from(self.deleted));

        let sealed_len = (plain.len() + OVERHEAD) as u16;
        let len_prefix = sealed_len.to_le_bytes();
        let sealed = cipher.seal(&plain, &len_prefix)?;

        dest.write_all(&len_prefix)?;
        dest.write_all(&sealed)?;

        self.sealed_len = sealed_len;
        Ok(())
    }

    /// Read and open one header.
    ///
    /// Returns `Ok(None)` at end of stream: either a clean EOF before the
    /// length prefix, or EOF inside the sealed bytes (the signature of an
    /// append torn by a crash; the torn tail is left in place). A sealed
    /// blob that is fully present but does not authenticate is fatal.
    pub fn read(src: &mut impl Read, cipher: &CipherBox) -> CryptarResult<Option<Self>> {
        let mut len_prefix = [0u8; LEN_PREFIX_SIZE];
        match src.read_exact(&mut len_prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let sealed_len = u16::from_le_bytes(len_prefix);
        if sealed_len < MIN_SEALED_LEN {
            return Err(CryptarError::InvalidFormat("item header too short"));
        }

        let mut sealed = vec![0u8; sealed_len as usize];
        match src.read_exact(&mut sealed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let plain = cipher.open(&sealed, &len_prefix)?;
        let mut header = Self::parse(&plain)?;
        header.sealed_len = sealed_len;
        Ok(Some(header))
    }

    fn parse(plain: &[u8]) -> CryptarResult<Self> {
        let mut at = 0;

        let path_len = u16::from_le_bytes(
            field(plain, &mut at, PATH_LEN_SIZE)?
                .try_into()
                .expect("fixed slice"),
        ) as usize;
        let path = String::from_utf8_lossy(field(plain, &mut at, path_len)?).into_owned();

        let size = i64::from_le_bytes(
            field(plain, &mut at, SIZE_SIZE)?.try_into().expect("fixed slice"),
        );
        let chunks = i64::from_le_bytes(
            field(plain, &mut at, CHUNKS_SIZE)?.try_into().expect("fixed slice"),
        );
        let mtime = i64::from_le_bytes(
            field(plain, &mut at, MTIME_SIZE)?.try_into().expect("fixed slice"),
        );
        let mode = u32::from_le_bytes(
            field(plain, &mut at, MODE_SIZE)?.try_into().expect("fixed slice"),
        );
        let deleted = field(plain, &mut at, DELETED_SIZE)?[0] != 0;

        Ok(Self {
            path,
            size,
            chunks,
            mtime,
            mode,
            deleted,
            sealed_len: 0,
        })
    }
}

fn field<'a>(plain: &'a [u8], at: &mut usize, n: usize) -> CryptarResult<&'a [u8]> {
    let slice = plain
        .get(*at..*at + n)
        .ok_or(CryptarError::InvalidFormat("item header fields truncated"))?;
    *at += n;
    Ok(slice)
}

/// An enumerated archive entry: its header plus the file offset where its
/// body begins (equal to the offset after the header for directories).
#[derive(Debug, Clone)]
pub struct Item {
    pub header: ItemHeader,
    pub offset: u64,
}

impl Item {
    /// Offset of the item's 2-byte length prefix, for in-place rewrites.
    pub fn header_offset(&self) -> u64 {
        self.offset - self.header.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptar_crypto::{CipherBox, DataKey};
    use std::io::Cursor;

    fn test_cipher() -> CipherBox {
        CipherBox::new(&DataKey::from_bytes([7u8; 32]))
    }

    fn sample() -> ItemHeader {
        ItemHeader::new(
            "docs/readme.txt".into(),
            1234,
            1,
            1_700_000_000,
            MODE_REGULAR | 0o644,
        )
    }

    #[test]
    fn write_read_roundtrip() {
        let cipher = test_cipher();
        let mut buf = Vec::new();
        let mut header = sample();
        header.write(&mut buf, &cipher).unwrap();

        assert_eq!(buf.len() as u64, header.len());

        let parsed = ItemHeader::read(&mut Cursor::new(buf), &cipher)
            .unwrap()
            .expect("header present");
        assert_eq!(parsed.path, "docs/readme.txt");
        assert_eq!(parsed.size, 1234);
        assert_eq!(parsed.chunks, 1);
        assert_eq!(parsed.mtime, 1_700_000_000);
        assert_eq!(parsed.kind(), ItemKind::Regular);
        assert!(!parsed.deleted);
        assert_eq!(parsed.len(), header.len());
    }

    #[test]
    fn directory_kind_from_mode() {
        let cipher = test_cipher();
        let mut buf = Vec::new();
        let mut header = ItemHeader::new("docs".into(), 0, 0, 0, MODE_DIR | 0o755);
        header.write(&mut buf, &cipher).unwrap();

        let parsed = ItemHeader::read(&mut Cursor::new(buf), &cipher)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.kind(), ItemKind::Directory);
    }

    #[test]
    fn unknown_mode_classified() {
        let header = ItemHeader::new("dev/null".into(), 0, 0, 0, 0o020_666);
        assert_eq!(header.kind(), ItemKind::Unknown);
    }

    #[test]
    fn reseal_keeps_length() {
        let cipher = test_cipher();
        let mut first = Vec::new();
        let mut header = sample();
        header.write(&mut first, &cipher).unwrap();

        header.deleted = true;
        let mut second = Vec::new();
        header.write(&mut second, &cipher).unwrap();

        assert_eq!(first.len(), second.len(), "tombstoning must not change length");
        assert_ne!(first, second, "fresh nonce must change the bytes");
    }

    #[test]
    fn clean_eof_is_end_of_stream() {
        let cipher = test_cipher();
        let result = ItemHeader::read(&mut Cursor::new(Vec::new()), &cipher).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn torn_tail_is_end_of_stream() {
        let cipher = test_cipher();
        let mut buf = Vec::new();
        sample().write(&mut buf, &cipher).unwrap();
        buf.truncate(buf.len() - 10);

        let result = ItemHeader::read(&mut Cursor::new(buf), &cipher).unwrap();
        assert!(result.is_none(), "torn sealed bytes end the stream cleanly");
    }

    #[test]
    fn rejects_impossibly_short_length() {
        let cipher = test_cipher();
        let mut buf = vec![5u8, 0u8];
        buf.extend_from_slice(&[0u8; 5]);

        assert!(matches!(
            ItemHeader::read(&mut Cursor::new(buf), &cipher),
            Err(CryptarError::InvalidFormat("item header too short"))
        ));
    }

    #[test]
    fn tampered_header_fails_auth() {
        let cipher = test_cipher();
        let mut buf = Vec::new();
        sample().write(&mut buf, &cipher).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0x01;

        assert!(matches!(
            ItemHeader::read(&mut Cursor::new(buf), &cipher),
            Err(CryptarError::Auth)
        ));
    }

    #[test]
    fn forged_length_prefix_fails_auth() {
        let cipher = test_cipher();
        let mut buf = Vec::new();
        let mut header = sample();
        header.write(&mut buf, &cipher).unwrap();

        // Grow the prefix by one and pad; the prefix is AAD, so the seal
        // must reject it even though the ciphertext is intact.
        let forged = ((buf.len() - LEN_PREFIX_SIZE) as u16 + 1).to_le_bytes();
        buf[..LEN_PREFIX_SIZE].copy_from_slice(&forged);
        buf.push(0);

        assert!(matches!(
            ItemHeader::read(&mut Cursor::new(buf), &cipher),
            Err(CryptarError::Auth)
        ));
    }
}
