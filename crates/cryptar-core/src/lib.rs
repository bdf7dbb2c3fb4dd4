pub mod config;
pub mod error;

pub use config::{ArchiveOptions, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use error::{CryptarError, CryptarResult};
