//! Split Command
//!
//! Compresses, encrypts, and shards a file into `<prefix>.shard0..N`.

use crate::keyspec;
use crate::progress::{bytes_bar, ProgressReader};
use anyhow::{Context, Result};
use console::style;
use std::fs::{File, OpenOptions};

pub struct SplitConfig {
    pub input: String,
    pub output: String,
    pub data: u8,
    pub parity: u8,
    pub threshold: u8,
    pub key: String,
    pub iv: String,
}

pub fn run(config: SplitConfig) -> Result<()> {
    let key = keyspec::parse_key(&config.key)?;
    let iv = keyspec::parse_iv(&config.iv)?;
    let encoder = super::encoder(config.data, config.parity, config.threshold)?;

    let input = File::open(&config.input)
        .with_context(|| format!("failed to open input {}", config.input))?;
    let total = input.metadata()?.len();

    let mut shards: Vec<File> = Vec::with_capacity(encoder.total_shards());
    let mut paths = Vec::with_capacity(encoder.total_shards());
    for i in 0..encoder.total_shards() {
        let path = format!("{}.shard{}", config.output, i);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to create shard {path}"))?;
        shards.push(file);
        paths.push(path);
    }

    let bar = bytes_bar(total);
    let reader = ProgressReader::new(input, bar.clone());
    let result = encoder
        .encode(reader, &mut shards, &key, &iv)
        .context("encode failed")?;

    for (shard, path) in shards.iter_mut().zip(paths.iter()) {
        encoder
            .finalize_header(shard)
            .with_context(|| format!("failed to finalize {path}"))?;
    }
    bar.finish_and_clear();

    println!(
        "{} split {} ({} bytes) into {} shards",
        style("✓").green(),
        config.input,
        result.file_size,
        encoder.total_shards(),
    );
    println!("  sha256: {}", hex::encode(&result.file_hash));
    for path in &paths {
        println!("  {path}");
    }
    Ok(())
}
