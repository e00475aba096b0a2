//! Decoder orchestration: the layered read path.
//!
//! Decoding walks the shard headers to learn the fleet geometry, places
//! each shard into its slot by the index recorded in its header, stands in
//! an all-zero source for any missing slot, reconstructs the file key from
//! the header shares, and stacks the inverse of the write pipeline:
//!
//! ```text
//! shards -> stripe repair -> decrypt chunks -> decompress -> plaintext
//! ```
//!
//! Every layer exposes a seekable plaintext view over a seekable ciphertext
//! view, so a seek on the returned reader propagates down the stack by
//! computing layer-local offsets.

use crate::compress::CompressReader;
use crate::crypto::CipherReader;
use crate::encoder::Encoder;
use crate::erasure::{ErasureCoder, ErasureReader};
use crate::error::{Result, StitchError};
use crate::header::{Header, HEADER_SIZE};
use crate::keys;
use crate::util::{LimitReader, OffsetReader, ReadSeek, ZeroReadSeeker};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Read and parse the front header of every shard. Shards that cannot be
/// read or parsed yield `None`; the caller decides whether enough survive.
pub(crate) fn collect_headers<S: ReadSeek>(shards: &mut [S]) -> Vec<Option<Header>> {
    shards
        .iter_mut()
        .map(|shard| {
            let mut buf = vec![0u8; HEADER_SIZE];
            shard
                .seek(SeekFrom::Start(0))
                .and_then(|_| shard.read_exact(&mut buf))
                .ok()
                .and_then(|_| Header::decode(&buf).ok())
        })
        .collect()
}

/// Gather the key shares from all complete headers and recombine them into
/// the wrapped file key.
pub(crate) fn combine_header_keys(
    headers: &[Option<Header>],
    threshold: usize,
) -> Result<Vec<u8>> {
    let shares: Vec<Vec<u8>> = headers
        .iter()
        .flatten()
        .filter(|h| h.is_complete)
        .map(|h| h.file_key.clone())
        .collect();
    if shares.len() < threshold {
        return Err(StitchError::NotEnoughKeyShares {
            available: shares.len(),
            required: threshold,
        });
    }
    keys::combine_key_shares(&shares, threshold)
}

/// A slot in the fleet: either a real shard stream or an all-zero stand-in
/// whose blocks fail their hash check and decode as erasures.
#[derive(Debug)]
enum ShardSlot<S> {
    Present(S),
    Missing(ZeroReadSeeker),
}

impl<S: ReadSeek> Read for ShardSlot<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Present(s) => s.read(buf),
            Self::Missing(z) => z.read(buf),
        }
    }
}

impl<S: ReadSeek> Seek for ShardSlot<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Present(s) => s.seek(pos),
            Self::Missing(z) => z.seek(pos),
        }
    }
}

type DecodeStack<S> =
    LimitReader<CompressReader<CipherReader<ErasureReader<OffsetReader<ShardSlot<S>>>>>>;

/// Seekable plaintext view over a fleet of shards.
///
/// Implements `Read + Seek` with the exact length of the original
/// plaintext. Block repairs happening under a read are counted; callers
/// that care about degradation inspect [`ShardReader::corrupted_blocks`]
/// after reading.
#[derive(Debug)]
pub struct ShardReader<S> {
    inner: DecodeStack<S>,
    header: Header,
    corrupted: Arc<AtomicU64>,
}

impl<S: ReadSeek> ShardReader<S> {
    /// The geometry reference header the fleet was opened with.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of broken blocks detected (and repaired) by reads so far.
    pub fn corrupted_blocks(&self) -> u64 {
        self.corrupted.load(Ordering::Relaxed)
    }

    /// Advisory corruption report: `Err(CorruptionDetected)` if any block
    /// needed repair while reading, `Ok` otherwise. Reads that returned
    /// data remain valid either way.
    pub fn check_corruption(&self) -> Result<()> {
        match self.corrupted_blocks() {
            0 => Ok(()),
            count => Err(StitchError::CorruptionDetected { count }),
        }
    }
}

impl<S: ReadSeek> Read for ShardReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<S: ReadSeek> Seek for ShardReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl Encoder {
    /// Open a fleet of shards for reading and return a seekable plaintext
    /// view of the original input.
    ///
    /// Shards may arrive in any order; each is slotted by the index in its
    /// header. Missing slots are substituted with all-zero sources so the
    /// erasure layer treats their blocks as damage, which succeeds as long
    /// as at least `data_shards` real shards are present and enough headers
    /// carry key shares.
    pub fn new_read_seeker<S: ReadSeek>(
        &self,
        shards: Vec<S>,
        user_key: &[u8],
        iv: &[u8],
    ) -> Result<ShardReader<S>> {
        let total = self.total_shards();
        let data_shards = self.opts.data_shards as usize;
        if shards.len() < data_shards {
            return Err(StitchError::NotEnoughShards {
                available: shards.len(),
                required: data_shards,
            });
        }

        let mut shards = shards;
        let headers = collect_headers(&mut shards);

        // Any complete header works as the geometry reference; they are
        // byte-identical across the fleet.
        let hdr = headers
            .iter()
            .flatten()
            .find(|h| h.is_complete)
            .cloned()
            .ok_or(StitchError::NoCompleteHeader)?;
        if hdr.aes_block_size == 0 || hdr.rs_block_size == 0 {
            return Err(StitchError::HeaderDecode(
                "header carries zero block sizes".to_string(),
            ));
        }

        // Slot each shard by the index its header claims.
        let mut slots: Vec<Option<S>> = (0..total).map(|_| None).collect();
        for (shard, header) in shards.into_iter().zip(headers.iter()) {
            if let Some(h) = header {
                if h.is_complete && (h.shard_index as usize) < total {
                    slots[h.shard_index as usize] = Some(shard);
                }
            }
        }

        let available = slots.iter().filter(|s| s.is_some()).count();
        if available < data_shards {
            return Err(StitchError::NotEnoughShards {
                available,
                required: data_shards,
            });
        }

        // Reconstruct and unwrap the file key before touching the data.
        let wrapped = combine_header_keys(&headers, self.opts.key_threshold as usize)?;
        let file_key = keys::unwrap_file_key(&wrapped, user_key, iv)?;

        // Substitute zero sources for the missing slots and present every
        // data region as if it started at zero.
        let substitute_len = hdr.encrypted_size + HEADER_SIZE as u64;
        let readers: Vec<OffsetReader<ShardSlot<S>>> = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                let slot = match slot {
                    Some(s) => ShardSlot::Present(s),
                    None => {
                        warn!(shard = i, "missing shard, substituting zero source");
                        ShardSlot::Missing(ZeroReadSeeker::new(substitute_len))
                    }
                };
                OffsetReader::new(slot, HEADER_SIZE as u64)
            })
            .collect();

        let coder = ErasureCoder::new(
            data_shards,
            self.opts.parity_shards as usize,
            hdr.rs_block_size as usize,
        )?;
        let rs = ErasureReader::new(coder, readers, hdr.encrypted_size)?;
        let corrupted = rs.corruption_counter();

        let aes = CipherReader::new(
            rs,
            &file_key,
            hdr.aes_block_size as usize,
            hdr.compressed_size,
        );
        let zst = CompressReader::new(aes, hdr.compressed_size)?;
        let inner = LimitReader::new(zst, hdr.file_size);

        Ok(ShardReader {
            inner,
            header: hdr,
            corrupted,
        })
    }
}
