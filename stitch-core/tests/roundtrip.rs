//! End-to-end tests for the shard pipeline.
//!
//! Tests the complete pipeline: plaintext -> compress -> encrypt -> stripe ->
//! shards, and back through every failure mode the fleet is supposed to
//! survive.
//!
//! Run with: cargo test --test roundtrip

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use stitch_core::{Encoder, EncoderOptions, StitchError, HEADER_SIZE};

const USER_KEY: &[u8] = b"11111111222222223333333344444444";
const IV: &[u8] = b"1234567890ab";

const NEW_KEY: &[u8] = b"44444444333333332222222211111111";
const NEW_IV: &[u8] = b"ba0987654321";

/// Patterned test data, compressible and easy to verify.
fn pattern(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 256) as u8).collect()
}

/// Uniformly random test data, incompressible.
fn random_bytes(n: usize) -> Vec<u8> {
    let mut data = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut data);
    data
}

fn encoder(data: u8, parity: u8, threshold: u8) -> Encoder {
    Encoder::new(EncoderOptions {
        data_shards: data,
        parity_shards: parity,
        key_threshold: threshold,
    })
    .unwrap()
}

/// Encode `input` into in-memory shards and finalize their headers.
fn encode_fleet(enc: &Encoder, input: &[u8]) -> Vec<Cursor<Vec<u8>>> {
    let mut shards: Vec<Cursor<Vec<u8>>> =
        (0..enc.total_shards()).map(|_| Cursor::new(Vec::new())).collect();
    let res = enc.encode(input, &mut shards, USER_KEY, IV).unwrap();
    assert_eq!(res.file_size, input.len() as u64);
    assert_eq!(res.file_hash, Sha256::digest(input).to_vec());

    for shard in &mut shards {
        enc.finalize_header(shard).unwrap();
    }
    shards
}

fn decode_all(enc: &Encoder, shards: Vec<Cursor<Vec<u8>>>, key: &[u8], iv: &[u8]) -> Vec<u8> {
    let mut reader = enc.new_read_seeker(shards, key, iv).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn test_encode_decode_roundtrip() {
    let enc = encoder(2, 1, 2);
    let input = random_bytes(3922);

    let mut shards = encode_fleet(&enc, &input);

    let report = enc.verify_integrity(&mut shards).unwrap();
    assert!(report.all_good);
    assert!(report.fully_readable);
    assert_eq!(report.total_shards, 3);
    assert!(report.irrecoverable_blocks.is_empty());

    let output = decode_all(&enc, shards, USER_KEY, IV);
    assert_eq!(output, input);
}

#[test]
fn test_roundtrip_various_sizes() {
    let enc = encoder(2, 1, 2);
    for size in [0usize, 1, 13, 1024, 4096, 8192, 100_000] {
        let input = pattern(size);
        let shards = encode_fleet(&enc, &input);
        let output = decode_all(&enc, shards, USER_KEY, IV);
        assert_eq!(output, input, "mismatch at size {size}");
    }
}

#[test]
fn test_roundtrip_various_geometries() {
    let input = pattern(50_000);
    for (d, p, t) in [(1, 0, 1), (1, 1, 1), (2, 1, 2), (3, 2, 4), (4, 4, 2)] {
        let enc = encoder(d, p, t);
        let shards = encode_fleet(&enc, &input);
        let output = decode_all(&enc, shards, USER_KEY, IV);
        assert_eq!(output, input, "mismatch at geometry ({d},{p},{t})");
    }
}

#[test]
fn test_shard_geometry_identical_across_fleet() {
    let enc = encoder(3, 2, 3);
    let shards = encode_fleet(&enc, &pattern(10_000));

    let headers: Vec<_> = shards
        .iter()
        .map(|s| stitch_core::Header::decode(s.get_ref()).unwrap())
        .collect();

    for (i, hdr) in headers.iter().enumerate() {
        assert_eq!(hdr.shard_index as usize, i);
        assert_eq!(hdr.shard_count, 5);
        assert_eq!(hdr.data_shards, 3);
        assert_eq!(hdr.parity_shards, 2);
        assert_eq!(hdr.key_threshold, 3);
        assert_eq!(hdr.rs_block_size, 4096);
        assert_eq!(hdr.aes_block_size, 1024);
        assert!(hdr.is_complete);
        assert_eq!(hdr.file_hash, headers[0].file_hash);
        assert_eq!(hdr.file_size, headers[0].file_size);
        assert_eq!(hdr.encrypted_size, headers[0].encrypted_size);
        assert_eq!(hdr.compressed_size, headers[0].compressed_size);
        // Each shard carries a distinct key share.
        assert_ne!(hdr.file_key, headers[(i + 1) % headers.len()].file_key);
    }
}

#[test]
fn test_expected_block_counts() {
    // 16 KiB of random input compresses to just over 16 KiB, seals into 17
    // AES chunks of 1040 bytes, and 17680 ciphertext bytes span
    // ceil(17680 / (2 * 4096)) = 3 stripes per shard.
    let enc = encoder(2, 1, 2);
    let mut shards = encode_fleet(&enc, &random_bytes(16384));

    for (i, shard) in shards.iter_mut().enumerate() {
        shard.seek(SeekFrom::Start(0)).unwrap();
        let res = stitch_core::verify_shard_integrity(shard).unwrap();
        assert!(res.is_available);
        assert!(res.is_header_complete);
        assert_eq!(res.shard_index, i);
        assert_eq!(res.blocks_count, 3);
        assert_eq!(res.blocks_found, 3);
        assert!(res.broken_blocks.is_empty());
    }
}

/// Overwrite a few bytes at `offset` within a shard.
fn corrupt(shard: &mut Cursor<Vec<u8>>, offset: u64, bytes: &[u8]) {
    shard.seek(SeekFrom::Start(offset)).unwrap();
    shard.write_all(bytes).unwrap();
}

#[test]
fn test_damage_within_parity_budget() {
    let enc = encoder(2, 1, 2);
    let input = random_bytes(16384);
    let mut shards = encode_fleet(&enc, &input);

    // Hit block 0 and block 2 of shard 1: one damaged block per stripe.
    corrupt(&mut shards[1], 1024, b"blah");
    corrupt(&mut shards[1], 12345, b"asdf");

    shards[1].seek(SeekFrom::Start(0)).unwrap();
    let res = stitch_core::verify_shard_integrity(&mut shards[1]).unwrap();
    assert_eq!(res.broken_blocks, vec![0, 2]);
    assert_eq!(res.blocks_count, 3);
    assert_eq!(res.blocks_found, 3);

    let report = enc.verify_integrity(&mut shards).unwrap();
    assert!(!report.all_good);
    assert!(report.fully_readable);
    assert!(report.irrecoverable_blocks.is_empty());

    // One damaged block per stripe sits inside the parity budget.
    let mut reader = enc.new_read_seeker(shards, USER_KEY, IV).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, input);
    assert_eq!(reader.corrupted_blocks(), 2);
    assert!(matches!(
        reader.check_corruption(),
        Err(StitchError::CorruptionDetected { count: 2 })
    ));
}

#[test]
fn test_damage_beyond_parity_budget() {
    let enc = encoder(2, 1, 2);
    let input = random_bytes(16384);
    let mut shards = encode_fleet(&enc, &input);

    corrupt(&mut shards[1], 1024, b"blah");
    corrupt(&mut shards[1], 12345, b"asdf");
    // Stripe 0 now has two damaged blocks against one parity shard.
    corrupt(&mut shards[2], 1024, b"oops");
    corrupt(&mut shards[2], 8192, b"oops");

    let report = enc.verify_integrity(&mut shards).unwrap();
    assert!(!report.fully_readable);
    assert_eq!(report.irrecoverable_blocks, vec![0]);

    let mut reader = enc.new_read_seeker(shards, USER_KEY, IV).unwrap();
    let mut out = Vec::new();
    let err = reader.read_to_end(&mut out).unwrap_err();
    assert!(err.to_string().contains("stripe 0 is unrecoverable"));
}

#[test]
fn test_damaged_header_folds_into_fleet_report() {
    let enc = encoder(2, 1, 2);
    let input = random_bytes(16384);
    let mut shards = encode_fleet(&enc, &input);

    corrupt(&mut shards[1], 1024, b"blah");
    corrupt(&mut shards[1], 12345, b"asdf");
    corrupt(&mut shards[2], 1024, b"oops");
    corrupt(&mut shards[2], 8192, b"oops");
    // Destroy shard 1's magic; the whole shard becomes unreadable.
    corrupt(&mut shards[1], 0, b"meow meow");

    shards[1].seek(SeekFrom::Start(0)).unwrap();
    let err = stitch_core::verify_shard_integrity(&mut shards[1]).unwrap_err();
    assert!(matches!(
        err,
        StitchError::UnrecognizedMagic | StitchError::InvalidHeaderSize(_)
    ));

    // Two shards remain parseable; the unreadable shard counts against the
    // parity budget at every stripe, so both stripes shard 2 damaged go
    // over budget.
    let report = enc.verify_integrity(&mut shards).unwrap();
    assert!(!report.all_good);
    assert!(!report.fully_readable);
    assert_eq!(report.irrecoverable_blocks, vec![0, 1]);
    assert!(!report.by_shard[1].is_available);
    assert!(report.by_shard[0].is_available);
    assert!(report.by_shard[2].is_available);
}

#[test]
fn test_too_many_unreadable_shards() {
    let enc = encoder(2, 1, 2);
    let mut shards = encode_fleet(&enc, &pattern(10_000));

    corrupt(&mut shards[0], 0, b"xxxxxxxxx");
    corrupt(&mut shards[2], 0, b"xxxxxxxxx");

    let err = enc.verify_integrity(&mut shards).unwrap_err();
    assert!(matches!(err, StitchError::NotEnoughShards { .. }));
}

#[test]
fn test_decode_with_missing_shard() {
    let enc = encoder(2, 1, 2);
    let input = pattern(1024 * 1024);
    let shards = encode_fleet(&enc, &input);

    // Drop each shard in turn; any two of the three must decode.
    for missing in 0..3 {
        let quorum: Vec<Cursor<Vec<u8>>> = shards
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != missing)
            .map(|(_, s)| s.clone())
            .collect();

        let mut reader = enc.new_read_seeker(quorum, USER_KEY, IV).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, input, "decode failed with shard {missing} missing");
    }
}

#[test]
fn test_decode_with_too_few_shards() {
    let enc = encoder(2, 1, 2);
    let shards = encode_fleet(&enc, &pattern(4096));

    let err = enc
        .new_read_seeker(vec![shards[0].clone()], USER_KEY, IV)
        .unwrap_err();
    assert!(matches!(
        err,
        StitchError::NotEnoughShards {
            available: 1,
            required: 2
        }
    ));
}

#[test]
fn test_shards_accepted_in_any_order() {
    let enc = encoder(3, 1, 2);
    let input = pattern(200_000);
    let mut shards = encode_fleet(&enc, &input);

    shards.reverse();
    let output = decode_all(&enc, shards, USER_KEY, IV);
    assert_eq!(output, input);
}

#[test]
fn test_unfinalized_shards_refused() {
    let enc = encoder(2, 1, 2);
    let mut shards: Vec<Cursor<Vec<u8>>> = (0..3).map(|_| Cursor::new(Vec::new())).collect();
    enc.encode(&pattern(4096)[..], &mut shards, USER_KEY, IV)
        .unwrap();

    // Headers were never promoted; the fronts still read incomplete.
    let err = enc.new_read_seeker(shards, USER_KEY, IV).unwrap_err();
    assert!(matches!(err, StitchError::NoCompleteHeader));
}

#[test]
fn test_finalize_is_idempotent() {
    let enc = encoder(2, 1, 2);
    let mut shards: Vec<Cursor<Vec<u8>>> = (0..3).map(|_| Cursor::new(Vec::new())).collect();
    enc.encode(&pattern(9000)[..], &mut shards, USER_KEY, IV)
        .unwrap();

    let mut once = shards[0].clone();
    enc.finalize_header(&mut once).unwrap();
    let mut twice = once.clone();
    enc.finalize_header(&mut twice).unwrap();
    assert_eq!(once.get_ref(), twice.get_ref());

    // The trailer is gone and the front header is complete.
    let hdr = stitch_core::Header::decode(once.get_ref()).unwrap();
    assert!(hdr.is_complete);
    let data_len = once.get_ref().len() - HEADER_SIZE;
    assert_eq!(data_len % (4096 + 32), 0);
}

#[test]
fn test_wrong_key_fails() {
    let enc = encoder(2, 1, 2);
    let shards = encode_fleet(&enc, &pattern(4096));

    let err = enc.new_read_seeker(shards, NEW_KEY, IV).unwrap_err();
    assert!(matches!(err, StitchError::DecryptionFailed));
}

#[test]
fn test_key_rotation() {
    let enc = encoder(2, 1, 2);
    let input = vec![0u8; 1024];

    // Rotation must refuse to run before the shards are finalized.
    let mut unfinalized: Vec<Cursor<Vec<u8>>> = (0..3).map(|_| Cursor::new(Vec::new())).collect();
    enc.encode(&input[..], &mut unfinalized, USER_KEY, IV)
        .unwrap();
    assert!(enc
        .rotate_keys(&mut unfinalized, USER_KEY, IV, NEW_KEY, NEW_IV)
        .is_err());

    let mut shards = encode_fleet(&enc, &input);

    let new_shares = enc
        .rotate_keys(&mut shards, USER_KEY, IV, NEW_KEY, NEW_IV)
        .unwrap();
    assert_eq!(new_shares.len(), 3);
    for (shard, share) in shards.iter_mut().zip(new_shares.iter()) {
        enc.update_shard_key(shard, share).unwrap();
    }

    // The old key no longer opens the fleet; the new one does.
    let err = enc
        .new_read_seeker(shards.clone(), USER_KEY, IV)
        .unwrap_err();
    assert!(matches!(err, StitchError::DecryptionFailed));

    let output = decode_all(&enc, shards, NEW_KEY, NEW_IV);
    assert_eq!(output, input);
}

#[test]
fn test_rotation_with_missing_shard() {
    let enc = encoder(2, 1, 2);
    let input = pattern(20_000);
    let shards = encode_fleet(&enc, &input);

    // Shard 1 is gone at rotation time; the surviving quorum still meets
    // the key threshold, so rotation computes a full set of fresh shares.
    let stale = shards[1].clone();
    let mut survivors = vec![shards[0].clone(), shards[2].clone()];
    let new_shares = enc
        .rotate_keys(&mut survivors, USER_KEY, IV, NEW_KEY, NEW_IV)
        .unwrap();
    assert_eq!(new_shares.len(), 3);

    // Each survivor takes the share matching its own header index.
    for shard in survivors.iter_mut() {
        let hdr = stitch_core::Header::decode(shard.get_ref()).unwrap();
        enc.update_shard_key(shard, &new_shares[hdr.shard_index as usize])
            .unwrap();
    }

    // The old key no longer opens the updated shards.
    let err = enc
        .new_read_seeker(survivors.clone(), USER_KEY, IV)
        .unwrap_err();
    assert!(matches!(err, StitchError::DecryptionFailed));

    // The shard that missed the rotation still carries its old share and
    // poisons recombination; it must be dropped or refreshed before use.
    let mixed = vec![survivors[0].clone(), stale, survivors[1].clone()];
    let err = enc.new_read_seeker(mixed, NEW_KEY, NEW_IV).unwrap_err();
    assert!(matches!(err, StitchError::DecryptionFailed));

    // The survivors alone decode under the new key, reconstructing the
    // absent shard's blocks through parity.
    let mut reader = enc.new_read_seeker(survivors, NEW_KEY, NEW_IV).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, input);
    assert!(reader.corrupted_blocks() > 0);
}

#[test]
fn test_update_shard_key_requires_finalized_shard() {
    let enc = encoder(2, 1, 2);
    let mut shards: Vec<Cursor<Vec<u8>>> = (0..3).map(|_| Cursor::new(Vec::new())).collect();
    enc.encode(&pattern(100)[..], &mut shards, USER_KEY, IV)
        .unwrap();

    let err = enc.update_shard_key(&mut shards[0], &[0u8; 49]).unwrap_err();
    assert!(matches!(err, StitchError::HeaderNotComplete));
}

#[test]
fn test_seek_equivalence() {
    let enc = encoder(2, 1, 2);
    let input = pattern(300_000);
    let shards = encode_fleet(&enc, &input);

    let mut reader = enc.new_read_seeker(shards, USER_KEY, IV).unwrap();
    for &offset in &[
        0usize, 1, 1023, 1024, 1025, 8191, 8192, 131_071, 131_072, 299_000, 299_999,
    ] {
        reader.seek(SeekFrom::Start(offset as u64)).unwrap();
        let want = 1000.min(input.len() - offset);
        let mut buf = vec![0u8; want];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, &input[offset..offset + want], "mismatch at offset {offset}");
    }

    // Seeking to the end yields a clean EOF.
    reader.seek(SeekFrom::End(0)).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_seek_after_damage_still_repairs() {
    let enc = encoder(2, 2, 2);
    let input = pattern(100_000);
    let mut shards = encode_fleet(&enc, &input);

    // Two damaged blocks in one stripe, within a two-parity budget.
    corrupt(&mut shards[0], 1024 + 100, b"????");
    corrupt(&mut shards[1], 1024 + 200, b"????");

    let mut reader = enc.new_read_seeker(shards, USER_KEY, IV).unwrap();
    reader.seek(SeekFrom::Start(50_000)).unwrap();
    let mut buf = vec![0u8; 10_000];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(buf, &input[50_000..60_000]);
}

#[test]
fn test_file_backed_shards() {
    let enc = encoder(2, 1, 2);
    let input = pattern(50_000);
    let dir = tempfile::tempdir().unwrap();

    let mut files: Vec<std::fs::File> = (0..3)
        .map(|i| {
            std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(dir.path().join(format!("shard{i}")))
                .unwrap()
        })
        .collect();

    enc.encode(&input[..], &mut files, USER_KEY, IV).unwrap();
    for file in &mut files {
        enc.finalize_header(file).unwrap();
    }

    // Finalization truncated the trailer off the files.
    let len = files[0].metadata().unwrap().len();
    assert_eq!((len - HEADER_SIZE as u64) % (4096 + 32), 0);

    let mut reader = enc.new_read_seeker(files, USER_KEY, IV).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, input);
}

#[test]
fn test_truncated_file_shard_reconstructs() {
    let enc = encoder(2, 1, 2);
    let input = random_bytes(50_000);
    let dir = tempfile::tempdir().unwrap();

    let mut files: Vec<std::fs::File> = (0..3)
        .map(|i| {
            std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(dir.path().join(format!("shard{i}")))
                .unwrap()
        })
        .collect();

    enc.encode(&input[..], &mut files, USER_KEY, IV).unwrap();
    for file in &mut files {
        enc.finalize_header(file).unwrap();
    }

    // Cut shard 2 mid-block, away from any framed-block boundary: the
    // last block disappears and the one before it ends 1000 bytes in.
    let len = files[2].metadata().unwrap().len();
    assert_eq!((len - HEADER_SIZE as u64) % 4128, 0);
    files[2].set_len(len - 4128 - 1000).unwrap();

    // The fleet report counts the missing tail but stays recoverable.
    let report = enc.verify_integrity(&mut files).unwrap();
    assert!(!report.all_good);
    assert!(report.fully_readable);
    assert!(report.irrecoverable_blocks.is_empty());
    assert!(report.by_shard[2].blocks_found < report.by_shard[2].blocks_count);

    // Decoding through the full stack repairs the truncated blocks; the
    // partially present block erases cleanly, never as a short payload.
    let mut reader = enc.new_read_seeker(files, USER_KEY, IV).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, input);
    assert!(reader.corrupted_blocks() >= 2);
}
