//! Line codec benchmark suite.
//!
//! Measures decoding of device output the way it arrives on the wire:
//! - Single status lines
//! - Bursts of notifications in one read
//! - Lines split across reads
//!
//! Run with: cargo bench --bench frame_codec
//! Results saved to: target/criterion/

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use madvr_client::protocol::{DeviceStatus, Frame, LineCodec, Notification};
use std::hint::black_box;
use tokio_util::codec::Decoder;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const STATUS_LINES: &[&str] = &[
    "IncomingSignalInfo 3840x2160 23.976p 2D 422 10bit HDR10 2020 TV 16:9",
    "OutgoingSignalInfo 3840x2160 23.976p 2D 444 12bit HDR10 2020 TV",
    "AspectRatio 1272:0525 2.423 240 \"Panavision\"",
    "MaskingRatio 4092:1689 2.423 240",
    "Temperatures 80 57 41 45",
    "ActivateProfile SOURCE 1",
];

const BURST_SIZES: &[usize] = &[1, 16, 256];

fn burst(count: usize) -> Vec<u8> {
    STATUS_LINES
        .iter()
        .cycle()
        .take(count)
        .flat_map(|line| format!("{line}\r\n").into_bytes())
        .collect()
}

// ============================================================================
// Benchmark: Decode
// ============================================================================

fn bench_decode_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_burst");

    for &count in BURST_SIZES {
        let input = burst(count);
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::new("lines", count), &input, |b, input| {
            b.iter(|| {
                let mut codec = LineCodec::new();
                let mut buf = BytesMut::from(&input[..]);
                let mut frames = 0usize;
                while let Ok(Some(frame)) = codec.decode(&mut buf) {
                    black_box(&frame);
                    frames += 1;
                }
                frames
            });
        });
    }

    group.finish();
}

fn bench_decode_split(c: &mut Criterion) {
    let input = burst(16);

    c.bench_function("decode_split_reads", |b| {
        b.iter(|| {
            let mut codec = LineCodec::new();
            let mut buf = BytesMut::new();
            let mut frames = 0usize;
            for chunk in input.chunks(7) {
                buf.extend_from_slice(chunk);
                while let Ok(Some(frame)) = codec.decode(&mut buf) {
                    black_box(&frame);
                    frames += 1;
                }
            }
            frames
        });
    });
}

// ============================================================================
// Benchmark: Classify and Apply
// ============================================================================

fn bench_apply_status(c: &mut Criterion) {
    let frames: Vec<Frame> = STATUS_LINES.iter().map(|line| Frame::new(*line)).collect();

    c.bench_function("classify_and_apply", |b| {
        b.iter(|| {
            let mut status = DeviceStatus::default();
            for frame in &frames {
                let notification = Notification::classify(frame);
                let _ = black_box(status.apply(&notification));
            }
            status
        });
    });
}

criterion_group!(benches, bench_decode_burst, bench_decode_split, bench_apply_status);
criterion_main!(benches);
