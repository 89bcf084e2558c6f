//! # Event Mesh Codec Benchmarks
//!
//! Cost of the hot paths in the envelope codec:
//!
//! | Operation | Expectation |
//! |-----------|-------------|
//! | encode | grows with payload size, compression above the threshold |
//! | decode | grows with payload size |
//! | peek_header | flat, independent of payload size |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mesh_bus::{CompressionConfig, EnvelopeCodec, MessageEnvelope, MessageHeader};
use mesh_tests::integration::fixtures::{registry, InventorySnapshot};
use std::time::Duration;

const ITEM_COUNTS: [usize; 4] = [1, 10, 100, 1000];

fn envelope(items: usize) -> MessageEnvelope<InventorySnapshot> {
    MessageEnvelope::new(
        MessageHeader::new("InventorySnapshot", "inventory-service"),
        InventorySnapshot::with_items(items),
    )
}

// ============================================================================
// ENCODE
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-encode");
    group.measurement_time(Duration::from_secs(5));

    let compressed = EnvelopeCodec::with_defaults(registry());
    let plain = EnvelopeCodec::new(registry(), CompressionConfig::disabled());

    for items in ITEM_COUNTS {
        let envelope = envelope(items);
        group.throughput(Throughput::Elements(items as u64));
        group.bench_with_input(BenchmarkId::new("zstd", items), &envelope, |b, env| {
            b.iter(|| black_box(compressed.encode(env).map(|bytes| bytes.len())))
        });
        group.bench_with_input(BenchmarkId::new("plain", items), &envelope, |b, env| {
            b.iter(|| black_box(plain.encode(env).map(|bytes| bytes.len())))
        });
    }

    group.finish();
}

// ============================================================================
// DECODE
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-decode");
    group.measurement_time(Duration::from_secs(5));

    let codec = EnvelopeCodec::with_defaults(registry());

    for items in ITEM_COUNTS {
        let bytes = match codec.encode(&envelope(items)) {
            Ok(bytes) => bytes,
            Err(e) => panic!("fixture failed to encode: {e}"),
        };
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("full", items), &bytes, |b, bytes| {
            b.iter(|| black_box(codec.decode::<InventorySnapshot>(bytes).is_ok()))
        });
    }

    group.finish();
}

// ============================================================================
// PEEK
// ============================================================================

fn bench_peek(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec-peek");
    group.measurement_time(Duration::from_secs(5));

    let codec = EnvelopeCodec::with_defaults(registry());

    for items in ITEM_COUNTS {
        let bytes = match codec.encode(&envelope(items)) {
            Ok(bytes) => bytes,
            Err(e) => panic!("fixture failed to encode: {e}"),
        };
        group.bench_with_input(BenchmarkId::new("header", items), &bytes, |b, bytes| {
            b.iter(|| black_box(codec.peek_header(bytes).is_some()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_peek);
criterion_main!(benches);
