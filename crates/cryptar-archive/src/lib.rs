//! cryptar-archive: the single-file encrypted archive format and its engine
//!
//! Archive layout (sequential, no central directory, no trailer):
//! ```text
//! [preamble: 102 bytes, plaintext]
//! [item]*
//!
//! item  = [header len: 2 LE][sealed item header][body frame]*
//! frame = [seq: 4 LE][size: 4 LE][sealed chunk: `size` bytes]
//! ```
//!
//! The preamble carries the KDF salt and the wrapped data key; everything
//! after it is sealed with XChaCha20-Poly1305 under that data key, so even
//! file names and modes are unreadable without the password. Enumeration
//! scans from the front; deletion tombstones in place; compaction rewrites
//! the file dropping tombstones.

pub mod archive;
pub mod body;
pub mod compress;
pub mod header;
pub mod item;

pub use archive::Archive;
pub use header::{ArchiveHeader, HEADER_LEN, MAGIC, VERSION};
pub use item::{Item, ItemHeader, ItemKind};
