//! Rotate Command
//!
//! Re-wraps the file key under a new user key and rewrites every shard
//! header in place. The shard data regions are untouched.
//!
//! Rotation needs only a key-threshold quorum, so shards may be absent
//! from the argument list; the ones given are each rewritten with the
//! fresh share matching their own header index. A shard that misses the
//! rotation keeps its stale share and must be dropped or re-rotated
//! before it can count toward the key threshold again.

use crate::keyspec;
use anyhow::{bail, Context, Result};
use console::style;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use stitch_core::{Header, HEADER_SIZE};

pub struct RotateConfig {
    pub shards: Vec<String>,
    pub data: u8,
    pub parity: u8,
    pub threshold: u8,
    pub old_key: String,
    pub old_iv: String,
    pub new_key: String,
    pub new_iv: String,
}

pub fn run(config: RotateConfig) -> Result<()> {
    let old_key = keyspec::parse_key(&config.old_key)?;
    let old_iv = keyspec::parse_iv(&config.old_iv)?;
    let new_key = keyspec::parse_key(&config.new_key)?;
    let new_iv = keyspec::parse_iv(&config.new_iv)?;
    let encoder = super::encoder(config.data, config.parity, config.threshold)?;

    if config.shards.is_empty() {
        bail!("no shard paths given");
    }
    let mut shards: Vec<std::fs::File> = config
        .shards
        .iter()
        .map(|path| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .with_context(|| format!("failed to open shard {path}"))
        })
        .collect::<Result<_>>()?;

    let new_shares = encoder
        .rotate_keys(&mut shards, &old_key, &old_iv, &new_key, &new_iv)
        .context("key rotation failed")?;

    // Shards may be passed in any order and some may be absent, so each
    // one is matched to the fresh share for the index its header claims.
    for (shard, path) in shards.iter_mut().zip(config.shards.iter()) {
        let mut buf = vec![0u8; HEADER_SIZE];
        shard
            .seek(SeekFrom::Start(0))
            .and_then(|_| shard.read_exact(&mut buf))
            .with_context(|| format!("failed to read header of {path}"))?;
        let hdr =
            Header::decode(&buf).with_context(|| format!("failed to parse header of {path}"))?;
        let share = new_shares
            .get(hdr.shard_index as usize)
            .with_context(|| format!("shard index {} out of range in {path}", hdr.shard_index))?;
        encoder
            .update_shard_key(shard, share)
            .with_context(|| format!("failed to rewrite header of {path}"))?;
    }

    println!(
        "{} rotated key across {} shards",
        style("✓").green(),
        config.shards.len(),
    );
    Ok(())
}
