//! Normalization and validation benchmarks for vigil-core.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use vigil_core::{CommandRequest, CommandValidator, Normalizer};
use vigil_protocol::ClientFrame;

fn bench_normalize(c: &mut Criterion) {
    let normalizer = Normalizer::new();
    let structured = br#"{"zone":"A","level":2,"sensors":[{"id":1,"armed":true},{"id":2,"armed":false}]}"#;
    let raw = b"sensor:triggered zone=A level=2";

    let mut group = c.benchmark_group("normalize");
    group.throughput(Throughput::Bytes(structured.len() as u64));
    group.bench_function("structured", |b| {
        b.iter(|| normalizer.normalize(black_box(structured)))
    });
    group.throughput(Throughput::Bytes(raw.len() as u64));
    group.bench_function("raw", |b| b.iter(|| normalizer.normalize(black_box(raw))));
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let validator = CommandValidator::default();
    let request = CommandRequest::from_frame(ClientFrame::disarm("1234"));

    c.bench_function("validate_disarm", |b| {
        b.iter(|| validator.validate(black_box(&request)))
    });
}

criterion_group!(benches, bench_normalize, bench_validate);
criterion_main!(benches);
