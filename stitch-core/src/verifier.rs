//! Shard and fleet integrity verification.
//!
//! A shard is verified by walking it from the front: parse the fixed
//! header, then re-hash every framed block until the stream runs out. Fleet
//! verification folds the per-shard reports into a recoverability verdict:
//! a stripe is irrecoverable when the shards damaged at that stripe
//! outnumber the parity budget. The verifier never fails because a single
//! shard is damaged; damage is data, not an error.

use crate::encoder::Encoder;
use crate::erasure::BLOCK_OVERHEAD;
use crate::error::{Result, StitchError};
use crate::header::{Header, HEADER_SIZE};
use crate::util::ReadSeek;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{self, Read, SeekFrom};

/// Per-shard breakdown produced by [`verify_shard_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShardVerificationResult {
    /// Whether the shard was readable at all.
    pub is_available: bool,
    /// Whether the front header is marked complete. An incomplete header
    /// indicates a corrupt header or a shard that was never finalized.
    pub is_header_complete: bool,
    /// Index of the shard as recorded in its header.
    pub shard_index: usize,
    /// Number of framed blocks the shard should carry, derived from the
    /// header: `ceil(encrypted_size / (data_shards * block_size))`.
    pub blocks_count: u64,
    /// Number of framed blocks actually found.
    pub blocks_found: u64,
    /// Sorted indices of blocks whose payload does not match its hash.
    pub broken_blocks: Vec<u64>,
}

/// Fleet-wide report produced by [`Encoder::verify_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// Total number of shards in the fleet.
    pub total_shards: usize,
    /// Whether every block of every shard is present and intact.
    pub all_good: bool,
    /// Whether every stripe is still within the parity budget, i.e. the
    /// object can be fully reconstructed.
    pub fully_readable: bool,
    /// Stripe indices whose damage exceeds the parity budget.
    pub irrecoverable_blocks: Vec<u64>,
    /// Per-shard breakdowns, indexed like the input. Unreadable shards
    /// appear with `is_available == false`.
    pub by_shard: Vec<ShardVerificationResult>,
}

/// Walk a single shard and report its health. Fails only when the header
/// region itself cannot be read or parsed.
pub fn verify_shard_integrity<S: Read>(shard: &mut S) -> Result<ShardVerificationResult> {
    let mut result = ShardVerificationResult::default();

    let mut buf = vec![0u8; HEADER_SIZE];
    shard.read_exact(&mut buf)?;
    result.is_available = true;

    let hdr = Header::decode(&buf)?;
    if hdr.rs_block_size == 0 || hdr.data_shards == 0 {
        return Err(StitchError::HeaderDecode(
            "header carries zero stripe geometry".to_string(),
        ));
    }
    result.is_header_complete = hdr.is_complete;
    result.shard_index = hdr.shard_index as usize;

    let stripe_data_size = hdr.data_shards as u64 * hdr.rs_block_size as u64;
    result.blocks_count = hdr.encrypted_size.div_ceil(stripe_data_size);

    let mut payload = vec![0u8; hdr.rs_block_size as usize];
    let mut hash = [0u8; BLOCK_OVERHEAD];
    loop {
        // A trailing partial block counts as present only if both the
        // payload and the hash read fully.
        if !read_fully(shard, &mut payload)? || !read_fully(shard, &mut hash)? {
            break;
        }
        if Sha256::digest(&payload).as_slice() != hash {
            result.broken_blocks.push(result.blocks_found);
        }
        result.blocks_found += 1;
    }

    Ok(result)
}

/// Read exactly `buf.len()` bytes; `Ok(false)` when the stream ends first.
fn read_fully<S: Read>(src: &mut S, buf: &mut [u8]) -> Result<bool> {
    match src.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl Encoder {
    /// Verify the integrity of a fleet of shards and report which stripes,
    /// if any, are beyond repair.
    ///
    /// Fails with `NotEnoughShards` only when too few shards were supplied
    /// or more shards are unreadable than the parity budget covers; all
    /// other damage is folded into the report.
    pub fn verify_integrity<S: ReadSeek>(&self, shards: &mut [S]) -> Result<VerificationResult> {
        let total = self.total_shards();
        let data_shards = self.opts.data_shards as usize;
        let parity_shards = self.opts.parity_shards as usize;
        if shards.len() < data_shards {
            return Err(StitchError::NotEnoughShards {
                available: shards.len(),
                required: data_shards,
            });
        }

        let mut results: Vec<Option<ShardVerificationResult>> = Vec::with_capacity(shards.len());
        let mut unreadable = 0usize;
        for shard in shards.iter_mut() {
            let verified = shard
                .seek(SeekFrom::Start(0))
                .map_err(StitchError::from)
                .and_then(|_| verify_shard_integrity(shard));
            match verified {
                Ok(res) => results.push(Some(res)),
                Err(_) => {
                    unreadable += 1;
                    results.push(None);
                }
            }
        }

        if unreadable > parity_shards {
            return Err(StitchError::NotEnoughShards {
                available: shards.len() - unreadable,
                required: data_shards,
            });
        }

        // Any healthy shard's expected block count is authoritative: the
        // geometry fields are byte-identical across the fleet.
        let stripes = results
            .iter()
            .flatten()
            .map(|r| r.blocks_count)
            .next()
            .unwrap_or(0);

        let mut all_good = unreadable == 0;
        for res in results.iter().flatten() {
            if res.blocks_count != res.blocks_found || !res.broken_blocks.is_empty() {
                all_good = false;
            }
        }

        // Sweep the stripes once, advancing a cursor per shard over its
        // sorted broken-block list, so the cost stays linear in the total
        // damage plus the stripe count.
        let mut cursors = vec![0usize; results.len()];
        let mut irrecoverable_blocks = Vec::new();
        for stripe in 0..stripes {
            let mut damage = unreadable;
            for (i, res) in results.iter().enumerate() {
                let Some(res) = res else { continue };
                let cursor = &mut cursors[i];
                while *cursor < res.broken_blocks.len() && res.broken_blocks[*cursor] < stripe {
                    *cursor += 1;
                }
                if *cursor < res.broken_blocks.len() && res.broken_blocks[*cursor] == stripe {
                    damage += 1;
                } else if stripe >= res.blocks_found {
                    // The shard ends before this stripe; its block is gone.
                    damage += 1;
                }
            }
            if damage > parity_shards {
                irrecoverable_blocks.push(stripe);
            }
        }

        Ok(VerificationResult {
            total_shards: total,
            all_good,
            fully_readable: irrecoverable_blocks.is_empty(),
            irrecoverable_blocks,
            by_shard: results
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect(),
        })
    }
}
