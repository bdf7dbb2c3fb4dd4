use thiserror::Error;

pub type CryptarResult<T> = Result<T, CryptarError>;

#[derive(Debug, Error)]
pub enum CryptarError {
    #[error("invalid archive format: {0}")]
    InvalidFormat(&'static str),

    #[error("wrong password for this archive")]
    WrongPassword,

    #[error("authentication failed: archive bytes are corrupted or were tampered with")]
    Auth,

    #[error("chunk order incorrect: expected {expected}, got {got}")]
    FrameOrder { expected: u64, got: u64 },

    #[error("path escapes the archive root: {0}")]
    InvalidPath(String),

    #[error("cannot move multiple items onto existing file: {0}")]
    TargetIsFile(String),

    #[error("unsupported file type (mode {mode:#o}): {path}")]
    UnsupportedMode { path: String, mode: u32 },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
