//! Benchmarks for the packet codec and stream framing
//!
//! Covers the per-tick hot path at 50 Hz with a handful of tracked objects:
//! - Encoding a pose row into a framed packet
//! - Splitting a buffered byte stream back into packets
//! - Decoding packets into typed messages
//! - Formatting rows as CSV lines
//!
//! Platform: Cross-platform (synthetic rows, CI-safe)

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use posecast::protocol::{FrameCodec, Message, Packet};
use posecast::telemetry::format::format_row;
use posecast::test_utils::sample_row;
use std::hint::black_box;
use tokio_util::codec::Decoder;

const OBJECT_COUNTS: [usize; 3] = [1, 3, 16];

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_telemetry_entry");

    for objects in OBJECT_COUNTS {
        let message = Message::TelemetryEntry(sample_row(1.25, objects));
        group.throughput(Throughput::Bytes(message.to_packet().frame_len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(objects), &message, |b, message| {
            b.iter(|| black_box(message.to_packet().to_frame()))
        });
    }

    group.finish();
}

fn bench_frame_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec_split");

    for objects in OBJECT_COUNTS {
        let frame = Message::TelemetryEntry(sample_row(1.25, objects)).to_packet().to_frame();
        let mut stream = BytesMut::new();
        for _ in 0..100 {
            stream.extend_from_slice(&frame);
        }
        group.throughput(Throughput::Bytes(stream.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(objects), &stream, |b, stream| {
            b.iter(|| {
                let mut codec = FrameCodec::default();
                let mut buf = stream.clone();
                let mut count = 0;
                while let Ok(Some(packet)) = codec.decode(&mut buf) {
                    black_box(&packet);
                    count += 1;
                }
                assert_eq!(count, 100);
            })
        });
    }

    group.finish();
}

fn bench_message_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_decode");

    for objects in OBJECT_COUNTS {
        let packet: Packet = Message::TelemetryEntry(sample_row(1.25, objects)).to_packet();
        group.bench_with_input(BenchmarkId::from_parameter(objects), &packet, |b, packet| {
            b.iter(|| black_box(Message::decode(black_box(packet)).expect("valid packet")))
        });
    }

    group.finish();
}

fn bench_csv_format(c: &mut Criterion) {
    let row = sample_row(12.34, 3);
    c.bench_function("format_row_3_objects", |b| b.iter(|| black_box(format_row(black_box(&row)))));
}

criterion_group!(benches, bench_encode, bench_frame_split, bench_message_decode, bench_csv_format);
criterion_main!(benches);
