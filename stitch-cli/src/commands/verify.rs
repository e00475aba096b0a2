//! Verify Command
//!
//! Walks every shard, re-hashes each framed block, and reports whether the
//! object is still fully recoverable.

use anyhow::{bail, Context, Result};
use console::style;
use std::fs::File;

pub struct VerifyConfig {
    pub shards: Vec<String>,
    pub data: u8,
    pub parity: u8,
    pub threshold: u8,
    pub json: bool,
}

pub fn run(config: VerifyConfig) -> Result<()> {
    let encoder = super::encoder(config.data, config.parity, config.threshold)?;

    if config.shards.is_empty() {
        bail!("no shard paths given");
    }
    let mut shards: Vec<File> = config
        .shards
        .iter()
        .map(|path| File::open(path).with_context(|| format!("failed to open shard {path}")))
        .collect::<Result<_>>()?;

    let report = encoder
        .verify_integrity(&mut shards)
        .context("fleet verification failed")?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.all_good {
        println!("{} all {} shards intact", style("✓").green(), report.total_shards);
    } else if report.fully_readable {
        println!(
            "{} damage detected, object still fully recoverable",
            style("!").yellow()
        );
    } else {
        println!(
            "{} object is NOT fully recoverable, {} stripes beyond repair: {:?}",
            style("✗").red(),
            report.irrecoverable_blocks.len(),
            report.irrecoverable_blocks,
        );
    }

    for (path, shard) in config.shards.iter().zip(report.by_shard.iter()) {
        if !shard.is_available {
            println!("  {} {}: unreadable", style("✗").red(), path);
            continue;
        }
        let status = if shard.broken_blocks.is_empty() && shard.blocks_found == shard.blocks_count
        {
            format!("{}", style("ok").green())
        } else {
            format!("{}", style("damaged").yellow())
        };
        println!(
            "  {path}: {status} (shard {}, {}/{} blocks, broken: {:?})",
            shard.shard_index, shard.blocks_found, shard.blocks_count, shard.broken_blocks,
        );
    }
    Ok(())
}
