//! Benchmarks for batch encoding
//!
//! These benchmarks measure:
//! 1. Encoding and chunking a block per compression method
//! 2. The effect of the chunk threshold on a compressed encode
//! 3. Pooled versus freshly allocated buffers

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chbulk_client::{BatchBuilder, BufferPool, ChunkedBuffer};
use chbulk_protocol::{Block, ColumnType, CompressionMethod};

/// Builder holding `rows` rows of a typical event table
fn create_batch(rows: u64, compression: CompressionMethod, max_chunk_bytes: usize) -> BatchBuilder {
    let header = Block::with_schema([
        ("timestamp", ColumnType::DateTime),
        ("user_id", ColumnType::UInt64),
        ("event", ColumnType::String),
        ("duration_ms", ColumnType::Float64),
        ("referrer", ColumnType::Nullable(Box::new(ColumnType::String))),
    ])
    .unwrap();

    let mut batch = BatchBuilder::new(header)
        .with_query("INSERT INTO events VALUES")
        .with_compression(compression)
        .with_max_chunk_bytes(max_chunk_bytes);

    for i in 0..rows {
        let referrer = (i % 4 == 0).then(|| format!("https://example.com/{}", i % 97));
        batch
            .append(vec![
                (1_700_000_000 + i as u32).into(),
                (i % 10_000).into(),
                ["page_view", "click", "scroll", "purchase"][(i % 4) as usize].into(),
                (i as f64 * 0.37).into(),
                referrer.into(),
            ])
            .unwrap();
    }
    batch
}

/// Benchmark a full build per compression method
fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");

    for compression in [
        CompressionMethod::None,
        CompressionMethod::Lz4,
        CompressionMethod::Zstd,
    ] {
        let batch = create_batch(10_000, compression, 1024 * 1024);
        let mut buf = ChunkedBuffer::with_capacity(1024 * 1024);

        group.throughput(Throughput::Elements(10_000));
        group.bench_function(compression.as_str(), |b| {
            b.iter(|| {
                batch.build(&mut buf).unwrap();
                black_box(buf.num_chunks())
            })
        });
    }

    group.finish();
}

/// Benchmark chunk thresholds - smaller chunks mean more frames
fn bench_chunk_threshold(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_threshold");

    for threshold in [16 * 1024, 64 * 1024, 1024 * 1024] {
        let batch = create_batch(10_000, CompressionMethod::Lz4, threshold);
        let mut buf = ChunkedBuffer::with_capacity(1024 * 1024);

        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(BenchmarkId::from_parameter(threshold), &batch, |b, batch| {
            b.iter(|| {
                batch.build(&mut buf).unwrap();
                black_box(buf.num_chunks())
            })
        });
    }

    group.finish();
}

/// Benchmark pooled buffers against a fresh allocation per batch
fn bench_buffer_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_reuse");

    let batch = create_batch(1_000, CompressionMethod::Lz4, 1024 * 1024);
    let pool = BufferPool::new(4, 256 * 1024);

    group.throughput(Throughput::Elements(1_000));
    group.bench_function("pooled", |b| {
        b.iter(|| {
            let mut buf = pool.acquire();
            batch.build(&mut buf).unwrap();
            black_box(buf.len())
        })
    });

    group.bench_function("allocated", |b| {
        b.iter(|| {
            let mut buf = ChunkedBuffer::new();
            batch.build(&mut buf).unwrap();
            black_box(buf.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_build, bench_chunk_threshold, bench_buffer_reuse);
criterion_main!(benches);
