//! Codec benchmarks for vigil-protocol.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use vigil_protocol::{codec, ClientFrame, Notification, ServerFrame};

fn notification(size: usize) -> ServerFrame {
    ServerFrame::from(Notification::new("x".repeat(size), Utc::now()))
}

fn bench_encode(c: &mut Criterion) {
    let frame = notification(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode_json(black_box(&frame)))
    });
    group.bench_function("msgpack_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = ClientFrame::disarm("1234");
    let text = codec::encode_json(&frame).unwrap();
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.bench_function("json_disarm", |b| {
        b.iter(|| codec::decode_json::<ClientFrame>(black_box(&text)))
    });
    group.bench_function("msgpack_disarm", |b| {
        b.iter(|| codec::decode::<ClientFrame>(black_box(&encoded)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
