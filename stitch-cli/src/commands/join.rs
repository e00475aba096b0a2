//! Join Command
//!
//! Reconstructs the original file from a quorum of shards. Missing shards
//! are simply omitted from the argument list; the decoder substitutes
//! zero sources and repairs through parity.

use crate::keyspec;
use crate::progress::{bytes_bar, ProgressReader};
use anyhow::{bail, Context, Result};
use console::style;
use std::fs::File;
use std::io;

pub struct JoinConfig {
    pub shards: Vec<String>,
    pub output: String,
    pub data: u8,
    pub parity: u8,
    pub threshold: u8,
    pub key: String,
    pub iv: String,
}

pub fn run(config: JoinConfig) -> Result<()> {
    let key = keyspec::parse_key(&config.key)?;
    let iv = keyspec::parse_iv(&config.iv)?;
    let encoder = super::encoder(config.data, config.parity, config.threshold)?;

    if config.shards.is_empty() {
        bail!("no shard paths given");
    }
    let shards: Vec<File> = config
        .shards
        .iter()
        .map(|path| File::open(path).with_context(|| format!("failed to open shard {path}")))
        .collect::<Result<_>>()?;

    let reader = encoder
        .new_read_seeker(shards, &key, &iv)
        .context("failed to open shard fleet")?;
    let file_size = reader.header().file_size;

    let mut output = File::create(&config.output)
        .with_context(|| format!("failed to create output {}", config.output))?;

    let bar = bytes_bar(file_size);
    let mut progress = ProgressReader::new(reader, bar.clone());
    io::copy(&mut progress, &mut output).context("decode failed")?;
    bar.finish_and_clear();

    let reader = progress.into_inner();
    match reader.check_corruption() {
        Ok(()) => println!(
            "{} joined {} bytes into {}",
            style("✓").green(),
            file_size,
            config.output,
        ),
        Err(err) => println!(
            "{} joined {} bytes into {} ({})",
            style("!").yellow(),
            file_size,
            config.output,
            err,
        ),
    }
    Ok(())
}
