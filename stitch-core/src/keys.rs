//! Key custody: file-key wrap, Shamir splitting, and recombination.
//!
//! A fresh 256-bit file key encrypts the content of every encoded object.
//! The file key never touches media directly: it is sealed under the
//! caller's key and IV, and the sealed bytes are split with Shamir's Secret
//! Sharing so that each shard header carries one share. Any `threshold`
//! shares recombine into the wrapped key; the caller's key then opens it.

use crate::crypto::{EncryptionKey, GcmCipher};
use crate::error::{Result, StitchError};
use sharks::{Share, Sharks};

/// Size of the file key in bytes.
pub const FILE_KEY_SIZE: usize = 32;

/// Seal the file key under the user key and IV.
pub fn wrap_file_key(file_key: &EncryptionKey, user_key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    let cipher = GcmCipher::new(user_key)?;
    cipher.seal(iv, file_key.as_bytes())
}

/// Open a wrapped file key with the user key and IV. Fails with
/// `DecryptionFailed` on a wrong key, wrong IV, or bit-rot in the
/// recombined share bytes.
pub fn unwrap_file_key(wrapped: &[u8], user_key: &[u8], iv: &[u8]) -> Result<EncryptionKey> {
    let cipher = GcmCipher::new(user_key)?;
    let key_bytes = cipher.open(iv, wrapped)?;
    EncryptionKey::from_slice(&key_bytes)
}

/// Split the wrapped file key into `total` Shamir shares, any `threshold`
/// of which recombine into the original bytes.
pub fn split_key(wrapped: &[u8], total: usize, threshold: usize) -> Result<Vec<Vec<u8>>> {
    if threshold == 0 || threshold > total || total > u8::MAX as usize {
        return Err(StitchError::InvalidThreshold { threshold, total });
    }
    let sharks = Sharks(threshold as u8);
    let shares: Vec<Vec<u8>> = sharks
        .dealer(wrapped)
        .take(total)
        .map(|share| Vec::from(&share))
        .collect();
    Ok(shares)
}

/// Recombine Shamir shares into the wrapped file key.
pub fn combine_key_shares(shares: &[Vec<u8>], threshold: usize) -> Result<Vec<u8>> {
    if shares.len() < threshold {
        return Err(StitchError::NotEnoughKeyShares {
            available: shares.len(),
            required: threshold,
        });
    }
    let parsed: Vec<Share> = shares
        .iter()
        .map(|bytes| Share::try_from(bytes.as_slice()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| StitchError::NotEnoughKeyShares {
            available: 0,
            required: threshold,
        })?;
    Sharks(threshold as u8)
        .recover(parsed.iter())
        .map_err(|_| StitchError::NotEnoughKeyShares {
            available: shares.len(),
            required: threshold,
        })
}
