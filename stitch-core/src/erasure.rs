//! Reed-Solomon framed block layer.
//!
//! Owns the on-shard binary format of the data region. A *stripe* consumes
//! `data_shards * block_size` bytes from the layer above and emits one
//! *framed block* per shard: the block payload followed by its SHA-256. The
//! framed blocks at position `k` on every shard form a systematic RS(D,P)
//! codeword over GF(2^8), so any D of them recover the stripe.
//!
//! On the read side each framed block is re-hashed; a mismatch (or a failed
//! read, which covers truncated and missing shards alike) marks that block
//! as an erasure for the codec to regenerate. Repairs are counted through a
//! shared counter so callers can observe degradation on an otherwise
//! successful decode.

use crate::error::{Result, StitchError};
use crate::util::ReadSeek;
use rand::rngs::OsRng;
use rand::RngCore;
use reed_solomon_erasure::galois_8::ReedSolomon;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Extra bytes appended to each block: the SHA-256 of the payload.
pub const BLOCK_OVERHEAD: usize = 32;

/// Stripe geometry and the underlying Reed-Solomon codec.
#[derive(Debug)]
pub struct ErasureCoder {
    data_shards: usize,
    parity_shards: usize,
    block_size: usize,
    /// Absent when the fleet carries no parity; stripes are then plain
    /// striping with per-block integrity only.
    codec: Option<ReedSolomon>,
}

impl ErasureCoder {
    /// Create a coder for `data_shards` + `parity_shards` shards with
    /// `block_size`-byte blocks.
    pub fn new(data_shards: usize, parity_shards: usize, block_size: usize) -> Result<Self> {
        if data_shards == 0 {
            return Err(StitchError::ErasureCoding(
                "data shards must be > 0".to_string(),
            ));
        }
        if block_size == 0 {
            return Err(StitchError::ErasureCoding(
                "block size must be > 0".to_string(),
            ));
        }
        let codec = if parity_shards > 0 {
            Some(ReedSolomon::new(data_shards, parity_shards)?)
        } else {
            None
        };
        Ok(Self {
            data_shards,
            parity_shards,
            block_size,
            codec,
        })
    }

    /// Number of data shards.
    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    /// Number of parity shards.
    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Total number of shards.
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Block payload size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Payload plus hash size of one framed block on a shard.
    pub fn framed_block_size(&self) -> usize {
        self.block_size + BLOCK_OVERHEAD
    }

    /// Bytes of input consumed per stripe.
    pub fn stripe_data_size(&self) -> usize {
        self.data_shards * self.block_size
    }

    /// Number of stripes (framed blocks per shard) needed to carry
    /// `encrypted_size` input bytes: `ceil(encrypted_size / (D * B))`.
    pub fn stripe_count(&self, encrypted_size: u64) -> u64 {
        encrypted_size.div_ceil(self.stripe_data_size() as u64)
    }

    /// Split one stripe of input into data blocks and fill in parity.
    fn encode_stripe(&self, stripe: &[u8]) -> Result<Vec<Vec<u8>>> {
        debug_assert_eq!(stripe.len(), self.stripe_data_size());

        let mut blocks: Vec<Vec<u8>> = stripe
            .chunks(self.block_size)
            .map(|c| c.to_vec())
            .collect();
        for _ in 0..self.parity_shards {
            blocks.push(vec![0u8; self.block_size]);
        }
        if let Some(codec) = &self.codec {
            codec.encode(&mut blocks)?;
        }
        Ok(blocks)
    }

    /// Check stripe consistency; blocks with erasures never verify.
    fn verify_stripe(&self, blocks: &[Option<Vec<u8>>]) -> bool {
        let Some(codec) = &self.codec else {
            return blocks.iter().all(|b| b.is_some());
        };
        if blocks.iter().any(|b| b.is_none()) {
            return false;
        }
        let refs: Vec<&[u8]> = blocks
            .iter()
            .map(|b| b.as_deref().unwrap_or_default())
            .collect();
        codec.verify(&refs).unwrap_or(false)
    }
}

/// Splits an input stream into stripes and writes framed blocks to the
/// shard writers.
///
/// Bytes are buffered until a full stripe is available, then cut, parity
/// encoded, hashed, and emitted synchronously. The caller must track the
/// unpadded input length separately; the final stripe is padded with random
/// bytes and this layer records nothing.
pub struct StripeWriter<'a, W> {
    coder: ErasureCoder,
    dst: &'a mut [W],
    buffer: Vec<u8>,
}

impl<'a, W: Write> StripeWriter<'a, W> {
    /// Create a writer fanning out to one writer per shard.
    pub fn new(coder: ErasureCoder, dst: &'a mut [W]) -> Result<Self> {
        if dst.len() != coder.total_shards() {
            return Err(StitchError::ShardCountMismatch {
                expected: coder.total_shards(),
                actual: dst.len(),
            });
        }
        Ok(Self {
            coder,
            dst,
            buffer: Vec::new(),
        })
    }

    fn emit_stripe(&mut self, start: usize) -> io::Result<()> {
        let stripe_size = self.coder.stripe_data_size();
        let blocks = self
            .coder
            .encode_stripe(&self.buffer[start..start + stripe_size])?;
        for (i, block) in blocks.iter().enumerate() {
            let hash = Sha256::digest(block);
            self.dst[i].write_all(block)?;
            self.dst[i].write_all(&hash)?;
        }
        Ok(())
    }

    /// Pad any residual input with random bytes to a whole stripe, encode
    /// it, and flush the shard writers.
    pub fn finish(mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let stripe_size = self.coder.stripe_data_size();
            let pad = stripe_size - self.buffer.len();
            let mut padding = vec![0u8; pad];
            OsRng.fill_bytes(&mut padding);
            self.buffer.extend_from_slice(&padding);
            self.emit_stripe(0)?;
        }
        for dst in self.dst.iter_mut() {
            dst.flush()?;
        }
        Ok(())
    }
}

impl<W: Write> Write for StripeWriter<'_, W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(p);

        let stripe_size = self.coder.stripe_data_size();
        let mut off = 0;
        while self.buffer.len() - off >= stripe_size {
            self.emit_stripe(off)?;
            off += stripe_size;
        }
        self.buffer.drain(..off);

        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for dst in self.dst.iter_mut() {
            dst.flush()?;
        }
        Ok(())
    }
}

/// Read one framed block at `offset`, mapping a stream that ends mid-frame
/// to `TruncatedShard`. `read_exact` retries short reads, so a source that
/// returns fewer bytes without reaching end-of-stream never yields a
/// partial block: either the whole frame arrives or the block is erased.
fn read_framed<R: ReadSeek>(
    shard: &mut R,
    offset: u64,
    payload: &mut [u8],
    hash: &mut [u8; BLOCK_OVERHEAD],
) -> Result<()> {
    shard.seek(SeekFrom::Start(offset))?;
    shard.read_exact(payload).map_err(eof_as_truncation)?;
    shard.read_exact(hash).map_err(eof_as_truncation)?;
    Ok(())
}

fn eof_as_truncation(e: io::Error) -> StitchError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        StitchError::TruncatedShard
    } else {
        StitchError::Io(e)
    }
}

/// Random-access view over the logical concatenation of all data blocks,
/// stripe by stripe, truncated to the recorded input length.
///
/// Every read re-frames the touched stripes: payloads are re-hashed, and
/// mismatching, truncated, or unreadable blocks are erased for the codec
/// to reconstruct when the damage fits the parity budget. A stripe whose
/// damage exceeds the budget fails the read with `Unrecoverable`.
#[derive(Debug)]
pub struct ErasureReader<R> {
    coder: ErasureCoder,
    shards: Vec<R>,
    out_size: u64,
    cursor: u64,
    /// Next stripe to fetch.
    stripe: u64,
    /// Head bytes of the next fetched stripe to skip after a seek.
    discard: u64,
    pending: Vec<u8>,
    pending_off: usize,
    broken_blocks: Arc<AtomicU64>,
    /// (stripe, shard) pairs already counted, so re-reading a stripe after
    /// a seek does not inflate the corruption count.
    seen_broken: HashSet<(u64, usize)>,
}

impl<R: ReadSeek> ErasureReader<R> {
    /// Create a reader over exactly `total_shards` shard streams carrying
    /// `out_size` logical bytes.
    pub fn new(coder: ErasureCoder, shards: Vec<R>, out_size: u64) -> Result<Self> {
        if shards.len() != coder.total_shards() {
            return Err(StitchError::ShardCountMismatch {
                expected: coder.total_shards(),
                actual: shards.len(),
            });
        }
        Ok(Self {
            coder,
            shards,
            out_size,
            cursor: 0,
            stripe: 0,
            discard: 0,
            pending: Vec::new(),
            pending_off: 0,
            broken_blocks: Arc::new(AtomicU64::new(0)),
            seen_broken: HashSet::new(),
        })
    }

    /// Shared counter of blocks found broken (and repaired) so far.
    pub fn corruption_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.broken_blocks)
    }

    /// Read the framed blocks of the next stripe from every shard, repair
    /// erasures, and stage the stripe's data bytes.
    fn fetch_stripe(&mut self) -> io::Result<()> {
        let block_size = self.coder.block_size();
        let framed = self.coder.framed_block_size() as u64;
        let stripe_size = self.coder.stripe_data_size();

        let mut blocks: Vec<Option<Vec<u8>>> = Vec::with_capacity(self.coder.total_shards());
        let mut broken = 0u64;
        for (i, shard) in self.shards.iter_mut().enumerate() {
            let mut payload = vec![0u8; block_size];
            let mut hash = [0u8; BLOCK_OVERHEAD];
            let read = read_framed(shard, self.stripe * framed, &mut payload, &mut hash);
            let intact = match read {
                Ok(()) => Sha256::digest(&payload).as_slice() == hash,
                Err(e) => {
                    debug!(shard = i, stripe = self.stripe, error = %e, "unreadable block");
                    false
                }
            };
            if intact {
                blocks.push(Some(payload));
            } else {
                blocks.push(None);
                if self.seen_broken.insert((self.stripe, i)) {
                    broken += 1;
                }
            }
        }

        if broken > 0 {
            warn!(
                stripe = self.stripe,
                broken, "detected damaged blocks, attempting repair"
            );
            self.broken_blocks.fetch_add(broken, Ordering::Relaxed);
        }

        let erased = blocks.iter().filter(|b| b.is_none()).count();
        if erased > 0 || !self.coder.verify_stripe(&blocks) {
            let unrecoverable = StitchError::Unrecoverable {
                stripe: self.stripe,
            };
            if erased > self.coder.parity_shards() {
                return Err(unrecoverable.into());
            }
            match &self.coder.codec {
                Some(codec) => {
                    codec
                        .reconstruct(&mut blocks)
                        .map_err(|_| io::Error::from(StitchError::Unrecoverable {
                            stripe: self.stripe,
                        }))?;
                }
                None => return Err(unrecoverable.into()),
            }
            if !self.coder.verify_stripe(&blocks) {
                return Err(io::Error::from(StitchError::Unrecoverable {
                    stripe: self.stripe,
                }));
            }
        }

        let mut data = Vec::with_capacity(stripe_size);
        for block in blocks.into_iter().take(self.coder.data_shards()) {
            let block = block.ok_or_else(|| {
                io::Error::from(StitchError::Unrecoverable {
                    stripe: self.stripe,
                })
            })?;
            data.extend_from_slice(&block);
        }

        // Truncate the final stripe to the recorded input length.
        let base = self.stripe * stripe_size as u64;
        let avail = (self.out_size - base).min(stripe_size as u64) as usize;
        data.truncate(avail);

        self.pending = data;
        self.pending_off = (self.discard as usize).min(self.pending.len());
        self.discard = 0;
        self.stripe += 1;
        Ok(())
    }
}

impl<R: ReadSeek> Read for ErasureReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.cursor >= self.out_size {
            return Ok(0);
        }
        if self.pending_off >= self.pending.len() {
            self.fetch_stripe()?;
            if self.pending_off >= self.pending.len() {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.pending.len() - self.pending_off);
        buf[..n].copy_from_slice(&self.pending[self.pending_off..self.pending_off + n]);
        self.pending_off += n;
        self.cursor += n as u64;
        Ok(n)
    }
}

impl<R: ReadSeek> Seek for ErasureReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.cursor as i64 + d,
            SeekFrom::End(d) => self.out_size as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        let target = target as u64;
        if target == self.cursor {
            // Position queries must not drop the staged stripe.
            return Ok(target);
        }
        let stripe_size = self.coder.stripe_data_size() as u64;

        self.stripe = target / stripe_size;
        self.discard = target - self.stripe * stripe_size;
        self.cursor = target;
        self.pending.clear();
        self.pending_off = 0;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_to_shards(
        input: &[u8],
        data: usize,
        parity: usize,
        block_size: usize,
    ) -> Vec<Vec<u8>> {
        let coder = ErasureCoder::new(data, parity, block_size).unwrap();
        let mut shards: Vec<Cursor<Vec<u8>>> =
            (0..coder.total_shards()).map(|_| Cursor::new(Vec::new())).collect();
        let mut writer = StripeWriter::new(coder, &mut shards).unwrap();
        writer.write_all(input).unwrap();
        writer.finish().unwrap();
        shards.into_iter().map(|c| c.into_inner()).collect()
    }

    fn reader_over(
        shards: Vec<Vec<u8>>,
        data: usize,
        parity: usize,
        block_size: usize,
        out_size: u64,
    ) -> ErasureReader<Cursor<Vec<u8>>> {
        let coder = ErasureCoder::new(data, parity, block_size).unwrap();
        let streams = shards.into_iter().map(Cursor::new).collect();
        ErasureReader::new(coder, streams, out_size).unwrap()
    }

    #[test]
    fn test_stripe_count_formula() {
        let coder = ErasureCoder::new(2, 1, 4096).unwrap();
        // A stripe carries data_shards * block_size = 8192 input bytes.
        assert_eq!(coder.stripe_count(0), 0);
        assert_eq!(coder.stripe_count(1), 1);
        assert_eq!(coder.stripe_count(8192), 1);
        assert_eq!(coder.stripe_count(8193), 2);
        assert_eq!(coder.stripe_count(17680), 3);
    }

    #[test]
    fn test_writer_emits_framed_blocks() {
        let input = vec![0x5au8; 8192 * 2 + 100];
        let shards = encode_to_shards(&input, 2, 1, 4096);

        // Three stripes (two full, one padded), one framed block each.
        for shard in &shards {
            assert_eq!(shard.len(), 3 * (4096 + BLOCK_OVERHEAD));
        }

        // Every framed block self-checks.
        for shard in &shards {
            for frame in shard.chunks(4096 + BLOCK_OVERHEAD) {
                let (payload, hash) = frame.split_at(4096);
                assert_eq!(Sha256::digest(payload).as_slice(), hash);
            }
        }
    }

    #[test]
    fn test_roundtrip_clean() {
        let input: Vec<u8> = (0..20_000).map(|i| (i % 256) as u8).collect();
        let shards = encode_to_shards(&input, 2, 1, 512);

        let mut reader = reader_over(shards, 2, 1, 512, input.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, input);
        assert_eq!(reader.corruption_counter().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_repairs_within_parity_budget() {
        let input: Vec<u8> = (0..20_000).map(|i| (i * 3 % 256) as u8).collect();
        let mut shards = encode_to_shards(&input, 2, 1, 512);

        // Corrupt one block per stripe in shard 1.
        shards[1][0] ^= 0xff;
        shards[1][600] ^= 0xff;

        let mut reader = reader_over(shards, 2, 1, 512, input.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, input);
        assert_eq!(reader.corruption_counter().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unrecoverable_stripe() {
        let input: Vec<u8> = (0..4096).map(|i| (i % 256) as u8).collect();
        let mut shards = encode_to_shards(&input, 2, 1, 512);

        // Damage block 0 on two shards: more erasures than parity.
        shards[0][0] ^= 0xff;
        shards[1][0] ^= 0xff;

        let mut reader = reader_over(shards, 2, 1, 512, input.len() as u64);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        let inner = err.get_ref().unwrap().to_string();
        assert_eq!(inner, "stripe 0 is unrecoverable");
    }

    #[test]
    fn test_truncated_shard_counts_as_erasure() {
        let input: Vec<u8> = (0..8000).map(|i| (i % 256) as u8).collect();
        let mut shards = encode_to_shards(&input, 2, 1, 512);

        // Cut one shard mid-block, away from any frame boundary: the
        // partially present block and everything after it must erase and
        // repair, never surface as a partial payload.
        let framed = 512 + BLOCK_OVERHEAD;
        shards[2].truncate(3 * framed + 100);

        let mut reader = reader_over(shards, 2, 1, 512, input.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, input);
        // Blocks 3..8 of the cut shard were unreadable.
        assert_eq!(reader.corruption_counter().load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_seek_then_read() {
        let input: Vec<u8> = (0..30_000).map(|i| (i * 7 % 256) as u8).collect();
        let shards = encode_to_shards(&input, 3, 2, 256);

        let mut reader = reader_over(shards, 3, 2, 256, input.len() as u64);
        for &offset in &[0usize, 1, 767, 768, 769, 10_000, 29_999] {
            reader.seek(SeekFrom::Start(offset as u64)).unwrap();
            let mut buf = [0u8; 100];
            let n = reader.read(&mut buf).unwrap();
            assert!(n > 0, "no bytes at offset {offset}");
            assert_eq!(&buf[..n], &input[offset..offset + n]);
        }
    }

    #[test]
    fn test_no_parity_roundtrip() {
        let input: Vec<u8> = (0..5000).map(|i| (i % 256) as u8).collect();
        let shards = encode_to_shards(&input, 4, 0, 128);

        let mut reader = reader_over(shards, 4, 0, 128, input.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_no_parity_corruption_is_fatal() {
        let input = vec![9u8; 1024];
        let mut shards = encode_to_shards(&input, 4, 0, 128);
        shards[0][0] ^= 0xff;

        let mut reader = reader_over(shards, 4, 0, 128, input.len() as u64);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_shard_count_mismatch() {
        let coder = ErasureCoder::new(2, 1, 512).unwrap();
        let streams: Vec<Cursor<Vec<u8>>> = vec![Cursor::new(Vec::new()); 2];
        assert!(matches!(
            ErasureReader::new(coder, streams, 0),
            Err(StitchError::ShardCountMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }
}
