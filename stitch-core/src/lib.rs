//! Stitch core library
//!
//! Compresses, encrypts, and splits arbitrary byte streams into a set of
//! self-describing shards. This crate provides:
//! - Reed-Solomon erasure coding over framed, hash-checked blocks
//! - Chunked AES-256-GCM streaming encryption with deterministic nonces
//! - Seekable zstd compression
//! - File-key custody: user-key wrapping and Shamir splitting across shards
//! - Random-access decoding from any quorum of shards
//! - Per-shard and fleet-wide integrity verification
//!
//! Any `data_shards` of the `data_shards + parity_shards` outputs suffice
//! to reconstruct the original bytes; any party holding the user key can
//! recover the plaintext from a quorum, while a party without it learns
//! nothing about the content.

pub mod compress;
pub mod crypto;
pub mod decoder;
pub mod encoder;
pub mod erasure;
pub mod error;
pub mod header;
pub mod keys;
pub mod util;
pub mod verifier;

pub use decoder::ShardReader;
pub use encoder::{Encoder, EncoderOptions, EncodingResult};
pub use error::{Result, StitchError};
pub use header::{Header, HEADER_SIZE};
pub use verifier::{verify_shard_integrity, ShardVerificationResult, VerificationResult};

/// Size of a Reed-Solomon block in bytes.
pub const RS_BLOCK_SIZE: usize = 4096;

/// Bytes of plaintext sealed per AES-GCM chunk.
pub const AES_BLOCK_SIZE: usize = 1024;
