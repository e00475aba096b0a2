//! Encoder orchestration: the write path of the shard pipeline.
//!
//! An encode drives a push-model pipeline on the caller's thread:
//!
//! ```text
//! plaintext -> compress -> encrypt chunks -> stripe/parity/hash -> shard writers
//! ```
//!
//! Each shard receives a provisional header (marked incomplete), then its
//! framed blocks, then a completed header appended as a trailer. A separate
//! finalize step promotes the trailer over the front header, so the shard
//! writers can be pure append during the encode. If the encode fails at any
//! point no trailer is written and the shards remain inspectably
//! unfinalized.

use crate::compress::CompressWriter;
use crate::crypto::{CipherWriter, EncryptionKey};
use crate::decoder;
use crate::erasure::{ErasureCoder, StripeWriter};
use crate::error::{Result, StitchError};
use crate::header::{Header, HEADER_SIZE};
use crate::keys;
use crate::util::{ReadSeek, Truncate};
use crate::{AES_BLOCK_SIZE, RS_BLOCK_SIZE};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::info;

/// Size of the buffer used to pump plaintext through the pipeline.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Options for the [`Encoder`].
#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    /// Number of data shards to split data into.
    pub data_shards: u8,
    /// Number of parity shards to create. This also determines the maximum
    /// number of shards that can be lost before the data cannot be
    /// recovered.
    pub parity_shards: u8,
    /// Minimum number of shards required to reconstruct the key used to
    /// encrypt the data.
    pub key_threshold: u8,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            data_shards: 2,
            parity_shards: 1,
            key_threshold: 2,
        }
    }
}

/// Summary of a completed encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingResult {
    /// Size of the input plaintext in bytes.
    pub file_size: u64,
    /// SHA-256 hash of the input plaintext.
    pub file_hash: Vec<u8>,
}

/// Takes a stream of data and shards it into a configured number of data
/// and parity shards, compressing with zstd, encrypting with AES-GCM, and
/// splitting with Reed-Solomon along the way.
#[derive(Debug)]
pub struct Encoder {
    pub(crate) opts: EncoderOptions,
}

impl Encoder {
    /// Create a new encoder, validating the shard geometry.
    pub fn new(opts: EncoderOptions) -> Result<Self> {
        let total = opts.data_shards as usize + opts.parity_shards as usize;
        if opts.data_shards == 0 {
            return Err(StitchError::ErasureCoding(
                "data shards must be > 0".to_string(),
            ));
        }
        if total > u8::MAX as usize {
            return Err(StitchError::ErasureCoding(format!(
                "too many shards: {total} (max 255)"
            )));
        }
        if opts.key_threshold == 0 || opts.key_threshold as usize > total {
            return Err(StitchError::InvalidThreshold {
                threshold: opts.key_threshold as usize,
                total,
            });
        }
        Ok(Self { opts })
    }

    /// Total number of shards produced per encode.
    pub fn total_shards(&self) -> usize {
        self.opts.data_shards as usize + self.opts.parity_shards as usize
    }

    /// Geometry options this encoder was built with.
    pub fn options(&self) -> &EncoderOptions {
        &self.opts
    }

    fn base_header(&self) -> Header {
        Header {
            shard_count: self.total_shards() as u8,
            data_shards: self.opts.data_shards,
            parity_shards: self.opts.parity_shards,
            key_threshold: self.opts.key_threshold,
            rs_block_size: RS_BLOCK_SIZE as u32,
            aes_block_size: AES_BLOCK_SIZE as u32,
            ..Header::new()
        }
    }

    /// Encode `input` into the shard writers.
    ///
    /// Writes a provisional header and the framed data region to every
    /// shard, then appends a completed header as a trailer. Callers promote
    /// the trailer with [`Encoder::finalize_header`] once the writers are
    /// durably stored.
    pub fn encode<R: Read, W: Write>(
        &self,
        mut input: R,
        shards: &mut [W],
        user_key: &[u8],
        iv: &[u8],
    ) -> Result<EncodingResult> {
        let total = self.total_shards();
        if shards.len() != total {
            return Err(StitchError::ShardCountMismatch {
                expected: total,
                actual: shards.len(),
            });
        }

        // Generate the file key and split its wrapped form across shards.
        let file_key = EncryptionKey::generate();
        let wrapped = keys::wrap_file_key(&file_key, user_key, iv)?;
        let key_shares = keys::split_key(&wrapped, total, self.opts.key_threshold as usize)?;

        // Provisional headers: geometry and key shares only.
        for (i, shard) in shards.iter_mut().enumerate() {
            let hdr = Header {
                shard_index: i as u8,
                file_key: key_shares[i].clone(),
                ..self.base_header()
            };
            shard.write_all(&hdr.encode()?)?;
        }

        // Compose the pipeline and pump the input through it, hashing and
        // counting exactly the bytes read.
        let coder = ErasureCoder::new(
            self.opts.data_shards as usize,
            self.opts.parity_shards as usize,
            RS_BLOCK_SIZE,
        )?;
        let mut rs = StripeWriter::new(coder, shards)?;
        let mut aes = CipherWriter::new(&mut rs, &file_key, AES_BLOCK_SIZE);
        let mut zst = CompressWriter::new(&mut aes);

        let mut hasher = Sha256::new();
        let mut file_size = 0u64;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file_size += n as u64;
            zst.write_all(&buf[..n])?;
        }

        // Tear down in order; each close flushes into the layer below.
        zst.finish()?;
        let (compressed_size, encrypted_size) = aes.finish()?;
        rs.finish()?;

        let file_hash = hasher.finalize().to_vec();

        // Append the completed header to every shard as a trailer.
        for (i, shard) in shards.iter_mut().enumerate() {
            let hdr = Header {
                shard_index: i as u8,
                file_key: key_shares[i].clone(),
                file_hash: file_hash.clone(),
                file_size,
                encrypted_size,
                compressed_size,
                is_complete: true,
                ..self.base_header()
            };
            shard.write_all(&hdr.encode()?)?;
        }

        info!(
            file_size,
            compressed_size,
            encrypted_size,
            shards = total,
            "encoded object"
        );

        Ok(EncodingResult {
            file_size,
            file_hash,
        })
    }

    /// Promote a shard's completed trailer into its front header region and
    /// truncate the trailer away. Idempotent: a shard whose front header is
    /// already complete is left untouched.
    pub fn finalize_header<S>(&self, shard: &mut S) -> Result<()>
    where
        S: Read + Write + Seek + Truncate,
    {
        shard.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; HEADER_SIZE];
        shard.read_exact(&mut buf)?;
        let front = Header::decode(&buf)?;
        if front.is_complete {
            return Ok(());
        }

        let end = shard.seek(SeekFrom::End(0))?;
        if end < 2 * HEADER_SIZE as u64 {
            return Err(StitchError::HeaderNotComplete);
        }
        shard.seek(SeekFrom::Start(end - HEADER_SIZE as u64))?;
        shard.read_exact(&mut buf)?;
        let trailer = Header::decode(&buf)?;
        if !trailer.is_complete {
            return Err(StitchError::HeaderNotComplete);
        }

        shard.seek(SeekFrom::Start(0))?;
        shard.write_all(&buf)?;

        // Best-effort removal of the trailer; readers only ever parse the
        // front header, so a resource that cannot shrink stays correct.
        shard.truncate(end - HEADER_SIZE as u64)?;
        Ok(())
    }

    /// Reconstruct the wrapped file key from the shard headers, re-wrap it
    /// under a new user key and IV, and split the result into fresh shares.
    ///
    /// The caller must then rewrite each shard's header share with
    /// [`Encoder::update_shard_key`]. Refuses to run when no finalized
    /// header is present.
    pub fn rotate_keys<S: ReadSeek>(
        &self,
        shards: &mut [S],
        old_key: &[u8],
        old_iv: &[u8],
        new_key: &[u8],
        new_iv: &[u8],
    ) -> Result<Vec<Vec<u8>>> {
        let total = self.total_shards();
        if shards.len() < self.opts.data_shards as usize {
            return Err(StitchError::NotEnoughShards {
                available: shards.len(),
                required: self.opts.data_shards as usize,
            });
        }

        let headers = decoder::collect_headers(shards);
        if !headers.iter().flatten().any(|h| h.is_complete) {
            return Err(StitchError::NoCompleteHeader);
        }

        let wrapped = decoder::combine_header_keys(&headers, self.opts.key_threshold as usize)?;
        let file_key = keys::unwrap_file_key(&wrapped, old_key, old_iv)?;

        let rewrapped = keys::wrap_file_key(&file_key, new_key, new_iv)?;
        let new_shares = keys::split_key(&rewrapped, total, self.opts.key_threshold as usize)?;

        info!(shards = total, "rotated file key");
        Ok(new_shares)
    }

    /// Rewrite a shard's header in place with a new key share, re-padding
    /// the header region. The shard must be finalized.
    pub fn update_shard_key<S>(&self, shard: &mut S, new_share: &[u8]) -> Result<()>
    where
        S: Read + Write + Seek,
    {
        shard.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; HEADER_SIZE];
        shard.read_exact(&mut buf)?;
        let mut hdr = Header::decode(&buf)?;
        if !hdr.is_complete {
            return Err(StitchError::HeaderNotComplete);
        }

        hdr.file_key = new_share.to_vec();
        shard.seek(SeekFrom::Start(0))?;
        shard.write_all(&hdr.encode()?)?;
        Ok(())
    }
}
