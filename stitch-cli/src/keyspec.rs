//! Key and IV parsing for command-line flags.
//!
//! Flags accept raw byte strings or, with a `hex:` prefix, hex encoding.

use anyhow::{bail, Result};

fn parse_bytes(spec: &str) -> Result<Vec<u8>> {
    match spec.strip_prefix("hex:") {
        Some(hex) => hex::decode(hex).map_err(|e| anyhow::anyhow!("invalid hex: {e}")),
        None => Ok(spec.as_bytes().to_vec()),
    }
}

/// Parse an AES key flag; must resolve to 16, 24, or 32 bytes.
pub fn parse_key(spec: &str) -> Result<Vec<u8>> {
    let bytes = parse_bytes(spec)?;
    if !matches!(bytes.len(), 16 | 24 | 32) {
        bail!("key must be 16, 24, or 32 bytes, got {}", bytes.len());
    }
    Ok(bytes)
}

/// Parse an IV flag; must resolve to 12 bytes.
pub fn parse_iv(spec: &str) -> Result<Vec<u8>> {
    let bytes = parse_bytes(spec)?;
    if bytes.len() != 12 {
        bail!("IV must be 12 bytes, got {}", bytes.len());
    }
    Ok(bytes)
}
