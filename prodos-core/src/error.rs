//! Error types for the ProDOS filesystem engine.

use thiserror::Error;

/// Errors that can occur while reading or mutating a ProDOS volume.
#[derive(Error, Debug)]
pub enum ProdosError {
    #[error("I/O error at block {block}: {source}")]
    Io {
        block: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported ProDOS version {version} (minimum version {min_version})")]
    UnsupportedFormat { version: u8, min_version: u8 },

    #[error("Not a ProDOS volume: block 2 has storage type {0:#X}")]
    NotAVolume(u8),

    #[error("Corrupt directory at block {block}: {reason}")]
    CorruptDirectory { block: u16, reason: String },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File exists: {0}")]
    AlreadyExists(String),

    #[error("File already deleted: {0}")]
    AlreadyDeleted(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Disk full: {requested} blocks requested, {available} free")]
    NoFreeSpace { requested: usize, available: usize },

    #[error("No free file entries in directory: {0}")]
    DirectoryFull(String),

    #[error("File too large: {0} bytes (16MB maximum)")]
    FileTooLarge(usize),

    #[error("Name too long: {0} (15 characters maximum)")]
    NameTooLong(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Path not matched: {0}")]
    PathNotMatched(String),

    #[error("Invalid volume size: {0} blocks")]
    InvalidVolumeSize(u16),

    #[error("Invalid block size: {0} bytes (512 maximum)")]
    InvalidBlockSize(usize),

    #[error("Unsupported storage type: {0:#X}")]
    UnsupportedStorageType(u8),

    #[error("Host I/O error: {0}")]
    HostIo(#[from] std::io::Error),
}

impl ProdosError {
    /// Wrap an I/O failure with the block address it happened at.
    pub fn io(block: u16, source: std::io::Error) -> Self {
        Self::Io { block, source }
    }
}

/// Result type for ProDOS operations.
pub type ProdosResult<T> = Result<T, ProdosError>;
