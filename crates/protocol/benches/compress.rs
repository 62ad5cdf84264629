//! Benchmarks for the compressed frame codec
//!
//! These benchmarks measure:
//! 1. Compressing one frame per method and payload size
//! 2. Decompressing a stream of frames back into a single buffer

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chbulk_protocol::{CompressionMethod, Compressor, decompress_stream};

/// Column-like payload: repetitive enough to compress, not constant
fn create_payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i / 8) % 251) as u8).collect()
}

/// Benchmark compressing a single frame
fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");

    for method in [CompressionMethod::Lz4, CompressionMethod::Zstd] {
        for size in [4 * 1024, 64 * 1024, 1024 * 1024] {
            let payload = create_payload(size);
            let mut compressor = Compressor::new();

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(method.as_str(), size),
                &payload,
                |b, payload| b.iter(|| black_box(compressor.compress(method, payload).unwrap().len())),
            );
        }
    }

    group.finish();
}

/// Benchmark decompressing 16 frames of 64 KiB
fn bench_decompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompress");

    for method in [CompressionMethod::Lz4, CompressionMethod::Zstd] {
        let payload = create_payload(64 * 1024);
        let mut compressor = Compressor::new();
        let mut stream = Vec::new();
        for _ in 0..16 {
            stream.extend_from_slice(compressor.compress(method, &payload).unwrap());
        }

        group.throughput(Throughput::Bytes(16 * 64 * 1024));
        group.bench_function(method.as_str(), |b| {
            b.iter(|| black_box(decompress_stream(&stream).unwrap().len()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compress, bench_decompress);
criterion_main!(benches);
