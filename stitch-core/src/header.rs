//! Shard header serialization.
//!
//! Every shard starts with a fixed-size, self-describing preamble carrying
//! the fleet geometry, this shard's split of the wrapped file key, and the
//! plaintext fingerprint. A single shard is enough to learn the shape of the
//! whole fleet.
//!
//! Layout of the fixed header region:
//! - bytes [0..8): ASCII magic `STITCHv1`
//! - bytes [8..10): little-endian u16 length L of the descriptor
//! - bytes [10..10+L): JSON descriptor record
//! - bytes [10+L..1024): random padding
//!
//! The padding is drawn from the OS RNG so that, past the magic, a header is
//! not distinguishable from a ciphertext prefix. Unknown descriptor fields
//! are ignored on decode and absent optional fields take their defaults, so
//! the record can grow without breaking old readers.

use crate::error::{Result, StitchError};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Fixed size allocated for the header region of each shard.
pub const HEADER_SIZE: usize = 1024;

/// Magic bytes identifying a shard.
pub const MAGIC: &[u8; 8] = b"STITCHv1";

/// Descriptor record of a shard header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    /// Index of this shard within the fleet.
    #[serde(rename = "i")]
    pub shard_index: u8,

    /// Total number of shards in the fleet.
    #[serde(rename = "c")]
    pub shard_count: u8,

    /// Number of data shards.
    #[serde(rename = "d")]
    pub data_shards: u8,

    /// Number of parity shards.
    #[serde(rename = "p")]
    pub parity_shards: u8,

    /// Minimum number of key shares required to reconstruct the file key.
    #[serde(rename = "t")]
    pub key_threshold: u8,

    /// SHA-256 hash of the whole file plaintext.
    #[serde(rename = "h")]
    pub file_hash: Vec<u8>,

    /// This shard's Shamir share of the wrapped file key.
    #[serde(rename = "k")]
    pub file_key: Vec<u8>,

    /// Size of the file plaintext in bytes.
    #[serde(rename = "s")]
    pub file_size: u64,

    /// Total ciphertext bytes fed to the Reed-Solomon layer.
    #[serde(rename = "e")]
    pub encrypted_size: u64,

    /// Compressed bytes fed to the encryption layer.
    #[serde(rename = "z")]
    pub compressed_size: u64,

    /// Size of a Reed-Solomon block in bytes.
    #[serde(rename = "b")]
    pub rs_block_size: u32,

    /// Bytes of plaintext sealed per AES-GCM chunk.
    #[serde(rename = "a")]
    pub aes_block_size: u32,

    /// Whether this header describes a fully written shard. Provisional
    /// headers written at the start of an encode carry `false`; the
    /// completed trailer carries `true`.
    #[serde(rename = "f")]
    pub is_complete: bool,
}

impl Header {
    /// Create an empty header with all fields at their defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize the header into a fixed `HEADER_SIZE` buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; HEADER_SIZE];
        OsRng.fill_bytes(&mut buf);
        buf[..MAGIC.len()].copy_from_slice(MAGIC);

        let record =
            serde_json::to_vec(self).map_err(|e| StitchError::HeaderEncode(e.to_string()))?;
        if record.len() > HEADER_SIZE - 10 {
            return Err(StitchError::InvalidHeaderSize(record.len()));
        }

        buf[8..10].copy_from_slice(&(record.len() as u16).to_le_bytes());
        buf[10..10 + record.len()].copy_from_slice(&record);

        Ok(buf)
    }

    /// Parse a header from a `HEADER_SIZE` buffer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(StitchError::InvalidHeaderSize(buf.len()));
        }
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(StitchError::UnrecognizedMagic);
        }

        let record_len = u16::from_le_bytes([buf[8], buf[9]]) as usize;
        if record_len > HEADER_SIZE - 10 {
            return Err(StitchError::InvalidHeaderSize(record_len));
        }

        serde_json::from_slice(&buf[10..10 + record_len])
            .map_err(|e| StitchError::HeaderDecode(e.to_string()))
    }
}
