//! Benchmarks for the shard pipeline
//!
//! Run with: cargo bench --package stitch-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::{Cursor, Read};
use stitch_core::{Encoder, EncoderOptions};

const USER_KEY: &[u8] = b"11111111222222223333333344444444";
const IV: &[u8] = b"1234567890ab";

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

fn encoder() -> Encoder {
    Encoder::new(EncoderOptions {
        data_shards: 2,
        parity_shards: 1,
        key_threshold: 2,
    })
    .unwrap()
}

/// Benchmark the full encode pipeline at various input sizes
fn bench_encode(c: &mut Criterion) {
    let enc = encoder();

    let mut group = c.benchmark_group("pipeline_encode");

    for size in [
        1024 * 1024,      // 1 MB
        4 * 1024 * 1024,  // 4 MB
        16 * 1024 * 1024, // 16 MB
    ] {
        let data = generate_data(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}MB", size / (1024 * 1024))),
            &data,
            |b, data| {
                b.iter(|| {
                    let mut shards: Vec<Cursor<Vec<u8>>> =
                        (0..3).map(|_| Cursor::new(Vec::new())).collect();
                    enc.encode(black_box(&data[..]), &mut shards, USER_KEY, IV)
                        .unwrap()
                })
            },
        );
    }

    group.finish();
}

/// Benchmark decoding a healthy fleet
fn bench_decode(c: &mut Criterion) {
    let enc = encoder();

    let mut group = c.benchmark_group("pipeline_decode");

    for size in [1024 * 1024, 4 * 1024 * 1024] {
        let data = generate_data(size);
        let mut shards: Vec<Cursor<Vec<u8>>> = (0..3).map(|_| Cursor::new(Vec::new())).collect();
        enc.encode(&data[..], &mut shards, USER_KEY, IV).unwrap();
        for shard in &mut shards {
            enc.finalize_header(shard).unwrap();
        }

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}MB", size / (1024 * 1024))),
            &shards,
            |b, shards| {
                b.iter(|| {
                    let mut reader = enc
                        .new_read_seeker(shards.clone(), USER_KEY, IV)
                        .unwrap();
                    let mut out = Vec::with_capacity(size);
                    reader.read_to_end(&mut out).unwrap();
                    black_box(out)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark decoding with one shard missing (full reconstruction path)
fn bench_decode_degraded(c: &mut Criterion) {
    let enc = encoder();

    let size = 4 * 1024 * 1024;
    let data = generate_data(size);
    let mut shards: Vec<Cursor<Vec<u8>>> = (0..3).map(|_| Cursor::new(Vec::new())).collect();
    enc.encode(&data[..], &mut shards, USER_KEY, IV).unwrap();
    for shard in &mut shards {
        enc.finalize_header(shard).unwrap();
    }
    let quorum: Vec<Cursor<Vec<u8>>> = shards[..2].to_vec();

    let mut group = c.benchmark_group("pipeline_decode_degraded");
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("4MB_one_missing", |b| {
        b.iter(|| {
            let mut reader = enc
                .new_read_seeker(quorum.clone(), USER_KEY, IV)
                .unwrap();
            let mut out = Vec::with_capacity(size);
            reader.read_to_end(&mut out).unwrap();
            black_box(out)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_decode_degraded);
criterion_main!(benches);
