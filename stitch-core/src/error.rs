//! Error types for the stitch pipeline.
//!
//! Provides a unified error type for all shard pipeline operations.

use thiserror::Error;

/// Result type alias for stitch operations
pub type Result<T> = std::result::Result<T, StitchError>;

/// Unified error type for the shard pipeline
#[derive(Error, Debug)]
pub enum StitchError {
    // ===== Configuration Errors =====
    #[error("shard count mismatch: expected {expected}, got {actual}")]
    ShardCountMismatch { expected: usize, actual: usize },

    #[error("invalid key length: {0} bytes (expected 16, 24, or 32)")]
    InvalidKeyLength(usize),

    #[error("invalid IV length: {0} bytes (expected 12)")]
    InvalidIvLength(usize),

    #[error("invalid key threshold: {threshold} (total shards: {total})")]
    InvalidThreshold { threshold: usize, total: usize },

    // ===== Format Errors =====
    #[error("unrecognized magic bytes")]
    UnrecognizedMagic,

    #[error("invalid header size: {0} bytes")]
    InvalidHeaderSize(usize),

    #[error("failed to encode header: {0}")]
    HeaderEncode(String),

    #[error("failed to decode header: {0}")]
    HeaderDecode(String),

    #[error("header is not complete")]
    HeaderNotComplete,

    #[error("no complete header found in any shard")]
    NoCompleteHeader,

    #[error("invalid compression seek table")]
    InvalidSeekTable,

    // ===== Cryptography Errors =====
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("not enough key shares: have {available}, need {required}")]
    NotEnoughKeyShares { available: usize, required: usize },

    // ===== Redundancy Errors =====
    #[error("not enough shards: have {available}, need {required}")]
    NotEnoughShards { available: usize, required: usize },

    #[error("stripe {stripe} is unrecoverable")]
    Unrecoverable { stripe: u64 },

    #[error("detected corruption in {count} blocks")]
    CorruptionDetected { count: u64 },

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("shard truncated mid-block")]
    TruncatedShard,

    #[error("erasure coding error: {0}")]
    ErasureCoding(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reed_solomon_erasure::Error> for StitchError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        StitchError::ErasureCoding(err.to_string())
    }
}

impl From<StitchError> for std::io::Error {
    fn from(err: StitchError) -> Self {
        match err {
            StitchError::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
