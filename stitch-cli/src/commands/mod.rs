//! CLI command implementations

pub mod join;
pub mod rotate;
pub mod split;
pub mod verify;

use anyhow::Result;
use stitch_core::{Encoder, EncoderOptions};

/// Build an encoder from the geometry flags shared by every command.
pub(crate) fn encoder(data: u8, parity: u8, threshold: u8) -> Result<Encoder> {
    Ok(Encoder::new(EncoderOptions {
        data_shards: data,
        parity_shards: parity,
        key_threshold: threshold,
    })?)
}
